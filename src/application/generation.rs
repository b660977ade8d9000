use crate::application::AccountError;
use crate::domain::{
    Account, GeneratedImage, GenerationRequest, GenerationStatus, PaymentMethod, RequestError,
    Session,
};
use crate::infrastructure::{
    AccountRepository, GenerationCall, GenerationError, ImageGenerator, RepositoryError,
    RetryPolicy,
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum GenerationServiceError {
    #[error("Invalid request: {0}")]
    Request(#[from] RequestError),
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: u64, available: u64 },
    #[error("Payment method is the account's own API key, but no key is set")]
    MissingApiKey,
    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),
}

impl From<RepositoryError> for GenerationServiceError {
    fn from(e: RepositoryError) -> Self {
        GenerationServiceError::Account(AccountError::from(e))
    }
}

/// Shared stop signal for a running batch. Checked before each request and
/// after each response; an in-flight call is never aborted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Whether both handles point at the same signal.
    pub fn is_same(&self, other: &CancelFlag) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// What a batch costs and which key pays for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Charge {
    pub credits: u64,
    pub api_key: Option<String>,
}

pub struct GenerationService<A, G>
where
    A: AccountRepository,
    G: ImageGenerator,
{
    accounts: Arc<A>,
    generator: Arc<G>,
    retry: RetryPolicy,
    batch_delay: Duration,
}

impl<A, G> GenerationService<A, G>
where
    A: AccountRepository,
    G: ImageGenerator,
{
    pub fn new(
        accounts: Arc<A>,
        generator: Arc<G>,
        retry: RetryPolicy,
        batch_delay: Duration,
    ) -> Self {
        Self {
            accounts,
            generator,
            retry,
            batch_delay,
        }
    }

    /// Debits the cost of `images` up front. Nothing is refunded if the
    /// generation later fails.
    pub async fn charge(
        &self,
        session: &Session,
        images: u32,
    ) -> Result<Charge, GenerationServiceError> {
        if session.is_admin() {
            return Ok(Charge {
                credits: 0,
                api_key: None,
            });
        }

        let account = self.account(session).await?;
        match account.payment_method {
            PaymentMethod::ApiKey => {
                if !account.has_api_key() {
                    return Err(GenerationServiceError::MissingApiKey);
                }
                Ok(Charge {
                    credits: 0,
                    api_key: account.api_key,
                })
            }
            PaymentMethod::Credits => {
                let cost = account.generation_cost(images);
                let (success, balance) = self
                    .accounts
                    .debit_credits(&account.username, cost)
                    .await?;
                if !success {
                    return Err(GenerationServiceError::InsufficientCredits {
                        required: cost,
                        available: balance,
                    });
                }
                info!(username = %account.username, cost, balance, "Credits charged");
                Ok(Charge {
                    credits: cost,
                    api_key: None,
                })
            }
        }
    }

    /// Runs a whole batch and returns one slot per requested image. A failed
    /// image ends up in `error` state without stopping the rest.
    pub async fn run_batch(
        &self,
        session: &Session,
        request: &GenerationRequest,
        cancel: &CancelFlag,
    ) -> Result<Vec<GeneratedImage>, GenerationServiceError> {
        request.check()?;
        let charge = self.charge(session, request.number_of_images).await?;

        let millis = Utc::now().timestamp_millis();
        let mut images: Vec<GeneratedImage> = (0..request.number_of_images)
            .map(|i| {
                GeneratedImage::pending(
                    format!("gen_{}_{}", millis, i),
                    request.display_prompt(),
                    request.aspect_ratio.resolution_option(),
                )
            })
            .collect();

        let call = build_call(request, charge.api_key, request.number_of_images);

        if !request.is_variation() && request.model.generates_batch_per_call() {
            self.fill_from_single_call(&mut images, &call, cancel).await;
        } else {
            self.fill_serially(&mut images, &call, cancel).await;
        }

        if cancel.is_cancelled() {
            for image in images
                .iter_mut()
                .filter(|i| i.status == GenerationStatus::Pending)
            {
                image.fail();
            }
        }

        let succeeded = images
            .iter()
            .filter(|i| i.status == GenerationStatus::Success)
            .count();
        info!(
            username = %session.username,
            model = %request.model,
            requested = request.number_of_images,
            succeeded,
            cancelled = cancel.is_cancelled(),
            "Generation batch finished"
        );
        Ok(images)
    }

    /// Produces one new image for `image_id`, charged as a single image.
    pub async fn regenerate(
        &self,
        session: &Session,
        image_id: &str,
        request: &GenerationRequest,
    ) -> Result<GeneratedImage, GenerationServiceError> {
        let mut single = request.clone();
        single.number_of_images = 1;
        single.check()?;

        let charge = self.charge(session, 1).await?;
        let call = build_call(&single, charge.api_key, 1);

        let mut image = GeneratedImage::pending(
            image_id.to_string(),
            single.display_prompt(),
            single.aspect_ratio.resolution_option(),
        );
        match self.retry.run("regenerate", || self.generator.generate(&call)).await {
            Ok(mut results) if !results.is_empty() => image.succeed(results.swap_remove(0)),
            Ok(_) => image.fail(),
            Err(e) => {
                warn!(image_id, error = %e, "Regeneration failed");
                image.fail();
            }
        }
        Ok(image)
    }

    async fn fill_from_single_call(
        &self,
        images: &mut [GeneratedImage],
        call: &GenerationCall,
        cancel: &CancelFlag,
    ) {
        if cancel.is_cancelled() {
            return;
        }

        let result = self
            .retry
            .run("generate_batch", || self.generator.generate(call))
            .await;
        if cancel.is_cancelled() {
            return;
        }

        match result {
            Ok(results) => {
                let mut results = results.into_iter();
                for image in images.iter_mut() {
                    match results.next() {
                        Some(data) => image.succeed(data),
                        None => image.fail(),
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Batch generation failed");
                images.iter_mut().for_each(GeneratedImage::fail);
            }
        }
    }

    async fn fill_serially(
        &self,
        images: &mut [GeneratedImage],
        call: &GenerationCall,
        cancel: &CancelFlag,
    ) {
        let total = images.len();
        for (index, image) in images.iter_mut().enumerate() {
            if cancel.is_cancelled() {
                break;
            }

            let result = self
                .retry
                .run("generate_image", || self.generator.generate(call))
                .await;
            if cancel.is_cancelled() {
                break;
            }

            match result {
                Ok(mut results) if !results.is_empty() => image.succeed(results.swap_remove(0)),
                Ok(_) => image.fail(),
                Err(e) => {
                    warn!(image_id = %image.id, error = %e, "Image generation failed");
                    image.fail();
                }
            }

            if total > 1 && index + 1 < total {
                sleep(self.batch_delay).await;
            }
        }
    }

    async fn account(&self, session: &Session) -> Result<Account, GenerationServiceError> {
        self.accounts
            .get_by_username(&session.username)
            .await
            .map_err(|e| AccountError::from(e).for_user(&session.username).into())
    }
}

fn build_call(request: &GenerationRequest, api_key: Option<String>, images: u32) -> GenerationCall {
    let variation = request.is_variation();
    GenerationCall {
        model: request.model,
        prompt: request.remote_prompt(),
        aspect_ratio: request.aspect_ratio,
        number_of_images: if request.model.generates_batch_per_call() && !variation {
            images
        } else {
            1
        },
        reference_images: request.outgoing_references(),
        api_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AspectRatio, GenerationMode, ImageModel, ReferenceImage, ReferenceRole};
    use crate::infrastructure::{
        KvAccountRepository, MemoryStore, MockImageGenerator, SecretsEncryption,
    };
    use tokio::time::Instant;

    type Repo = KvAccountRepository<MemoryStore>;

    async fn repo_with(account: Account) -> Arc<Repo> {
        let encryption = Arc::new(
            SecretsEncryption::new("YWJjZGVmZ2hpamtsbW5vcHFyc3R1dnd4eXoxMjM0NTY=").unwrap(),
        );
        let repo = Arc::new(KvAccountRepository::new(
            Arc::new(MemoryStore::new()),
            encryption,
        ));
        repo.create(&account).await.unwrap();
        repo
    }

    fn request(model: ImageModel, images: u32) -> GenerationRequest {
        GenerationRequest {
            prompt: "a cat in a hat".to_string(),
            mode: GenerationMode::Standard,
            model,
            aspect_ratio: AspectRatio::Square,
            resolution: "1024x1024".to_string(),
            number_of_images: images,
            variation_strength: None,
            shot_type: None,
            clothing: None,
            background: None,
            reference_images: Vec::new(),
        }
    }

    fn service(repo: Arc<Repo>, generator: MockImageGenerator) -> GenerationService<Repo, MockImageGenerator> {
        GenerationService::new(
            repo,
            Arc::new(generator),
            RetryPolicy::default(),
            Duration::from_millis(2500),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn serial_batch_charges_and_spaces_requests() {
        let repo = repo_with(Account::new("lena".to_string(), "d".to_string(), 5)).await;
        let mut generator = MockImageGenerator::new();
        generator
            .expect_generate()
            .times(3)
            .returning(|call| {
                assert_eq!(call.number_of_images, 1);
                Ok(vec!["data:image/png;base64,AAA".to_string()])
            });

        let service = service(repo.clone(), generator);
        let started = Instant::now();
        let images = service
            .run_batch(
                &Session::user("lena"),
                &request(ImageModel::GeminiFlashImage, 3),
                &CancelFlag::new(),
            )
            .await
            .unwrap();

        assert_eq!(images.len(), 3);
        assert!(images.iter().all(|i| i.status == GenerationStatus::Success));
        assert!(images[0].id.starts_with("gen_"));
        assert_eq!(repo.get_by_username("lena").await.unwrap().credits, 2);
        assert!(started.elapsed() >= Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn insufficient_credits_makes_no_call() {
        let repo = repo_with(Account::new("lena".to_string(), "d".to_string(), 1)).await;
        let mut generator = MockImageGenerator::new();
        generator.expect_generate().never();

        let err = service(repo.clone(), generator)
            .run_batch(
                &Session::user("lena"),
                &request(ImageModel::GeminiFlashImage, 2),
                &CancelFlag::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GenerationServiceError::InsufficientCredits {
                required: 2,
                available: 1
            }
        ));
        assert_eq!(repo.get_by_username("lena").await.unwrap().credits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn own_key_without_key_fails_before_any_call() {
        let mut account = Account::new("lena".to_string(), "d".to_string(), 0);
        account.payment_method = PaymentMethod::ApiKey;
        let repo = repo_with(account).await;
        let mut generator = MockImageGenerator::new();
        generator.expect_generate().never();

        let err = service(repo, generator)
            .run_batch(
                &Session::user("lena"),
                &request(ImageModel::Imagen4, 1),
                &CancelFlag::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationServiceError::MissingApiKey));
    }

    #[tokio::test(start_paused = true)]
    async fn imagen_uses_one_call_and_own_key() {
        let mut account = Account::new("lena".to_string(), "d".to_string(), 0);
        account.payment_method = PaymentMethod::ApiKey;
        account.api_key = Some("user-key".to_string());
        let repo = repo_with(account).await;

        let mut generator = MockImageGenerator::new();
        generator.expect_generate().times(1).returning(|call| {
            assert_eq!(call.number_of_images, 3);
            assert_eq!(call.api_key.as_deref(), Some("user-key"));
            Ok(vec!["a".to_string(), "b".to_string()])
        });

        let images = service(repo, generator)
            .run_batch(
                &Session::user("lena"),
                &request(ImageModel::Imagen4, 3),
                &CancelFlag::new(),
            )
            .await
            .unwrap();

        let statuses: Vec<_> = images.iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![
                GenerationStatus::Success,
                GenerationStatus::Success,
                GenerationStatus::Error
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_image_does_not_stop_batch() {
        let repo = repo_with(Account::new("lena".to_string(), "d".to_string(), 2)).await;
        let mut generator = MockImageGenerator::new();
        let mut seq = mockall::Sequence::new();
        generator
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(GenerationError::SafetyRejected("SAFETY".to_string())));
        generator
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec!["ok".to_string()]));

        let images = service(repo, generator)
            .run_batch(
                &Session::user("lena"),
                &request(ImageModel::GeminiFlashImage, 2),
                &CancelFlag::new(),
            )
            .await
            .unwrap();

        assert_eq!(images[0].status, GenerationStatus::Error);
        assert_eq!(images[1].status, GenerationStatus::Success);
        assert_eq!(images[1].data.as_deref(), Some("ok"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_discards_late_result_and_fails_pending() {
        let repo = repo_with(Account::new("lena".to_string(), "d".to_string(), 4)).await;
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();

        let mut generator = MockImageGenerator::new();
        generator.expect_generate().times(1).returning(move |_| {
            trigger.cancel();
            Ok(vec!["late".to_string()])
        });

        let images = service(repo, generator)
            .run_batch(
                &Session::user("lena"),
                &request(ImageModel::GeminiFlashImage, 4),
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(images.len(), 4);
        assert!(images
            .iter()
            .all(|i| i.status == GenerationStatus::Error && i.data.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn portrait_sends_role_ordered_images_per_slot() {
        let repo = repo_with(Account::new("lena".to_string(), "d".to_string(), 2)).await;
        let mut generator = MockImageGenerator::new();
        generator.expect_generate().times(2).returning(|call| {
            let sent: Vec<_> = call.reference_images.iter().map(|r| r.data.as_str()).collect();
            assert_eq!(sent, vec!["FACE", "COAT"]);
            assert_eq!(call.prompt, "Full-length portrait in the given coat.");
            assert_eq!(call.number_of_images, 1);
            Ok(vec!["p".to_string()])
        });

        let mut req = request(ImageModel::GeminiFlashImage, 2);
        req.mode = GenerationMode::Portrait;
        req.prompt = "Full-length portrait in the given coat.".to_string();
        req.reference_images = vec![
            ReferenceImage::new("image/png", "COAT", ReferenceRole::Clothing),
            ReferenceImage::new("image/png", "FACE", ReferenceRole::Face),
        ];

        let images = service(repo.clone(), generator)
            .run_batch(&Session::user("lena"), &req, &CancelFlag::new())
            .await
            .unwrap();

        assert!(images.iter().all(|i| i.status == GenerationStatus::Success));
        assert_eq!(repo.get_by_username("lena").await.unwrap().credits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn regenerate_charges_one_credit() {
        let repo = repo_with(Account::new("lena".to_string(), "d".to_string(), 1)).await;
        let mut generator = MockImageGenerator::new();
        generator
            .expect_generate()
            .times(1)
            .returning(|_| Ok(vec!["fresh".to_string()]));

        let service = service(repo.clone(), generator);
        let image = service
            .regenerate(
                &Session::user("lena"),
                "gen_1_0",
                &request(ImageModel::Imagen4, 4),
            )
            .await
            .unwrap();

        assert_eq!(image.id, "gen_1_0");
        assert_eq!(image.data.as_deref(), Some("fresh"));
        assert_eq!(repo.get_by_username("lena").await.unwrap().credits, 0);
    }
}
