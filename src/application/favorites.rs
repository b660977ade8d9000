use crate::application::AccountError;
use crate::domain::{AddOutcome, Category, Favorites, Folder, FolderTarget, Session};
use crate::infrastructure::AccountRepository;
use std::sync::Arc;
use tracing::debug;

/// Favorites of the session's account. Every mutation is one
/// read-modify-write of the account record.
pub struct FavoritesService<A: AccountRepository> {
    accounts: Arc<A>,
}

impl<A: AccountRepository> FavoritesService<A> {
    pub fn new(accounts: Arc<A>) -> Self {
        Self { accounts }
    }

    pub async fn favorites(&self, session: &Session) -> Result<Favorites, AccountError> {
        if session.is_admin() {
            return Ok(Favorites::default());
        }
        self.accounts
            .get_by_username(&session.username)
            .await
            .map(|a| a.favorites)
            .map_err(|e| AccountError::from(e).for_user(&session.username))
    }

    pub async fn is_favorite(&self, session: &Session, image: &str) -> Result<bool, AccountError> {
        Ok(self.favorites(session).await?.contains(image))
    }

    pub async fn add(
        &self,
        session: &Session,
        image: &str,
        category: Category,
        target: &FolderTarget,
    ) -> Result<AddOutcome, AccountError> {
        let outcome = self
            .modify(session, |favorites| {
                favorites
                    .add(image, category, target)
                    .map_err(AccountError::from)
            })
            .await?;
        debug!(username = %session.username, %category, ?outcome, "Favorite added");
        Ok(outcome)
    }

    /// Removes every occurrence of `image`; unknown images are a no-op.
    pub async fn remove(&self, session: &Session, image: &str) -> Result<usize, AccountError> {
        self.modify(session, |favorites| Ok(favorites.remove(image)))
            .await
    }

    pub async fn create_folder(
        &self,
        session: &Session,
        category: Category,
        name: &str,
    ) -> Result<Folder, AccountError> {
        let name = folder_name(name)?;
        self.modify(session, |favorites| Ok(favorites.create_folder(category, &name)))
            .await
    }

    pub async fn rename_folder(
        &self,
        session: &Session,
        category: Category,
        folder_id: &str,
        name: &str,
    ) -> Result<(), AccountError> {
        let name = folder_name(name)?;
        self.modify(session, |favorites| {
            favorites
                .rename_folder(category, folder_id, &name)
                .map_err(AccountError::from)
        })
        .await
    }

    /// Deletes the folder and the favorites it held.
    pub async fn delete_folder(
        &self,
        session: &Session,
        category: Category,
        folder_id: &str,
    ) -> Result<Folder, AccountError> {
        self.modify(session, |favorites| {
            favorites
                .delete_folder(category, folder_id)
                .map_err(AccountError::from)
        })
        .await
    }

    async fn modify<T, F>(&self, session: &Session, apply: F) -> Result<T, AccountError>
    where
        F: FnOnce(&mut Favorites) -> Result<T, AccountError> + Send,
        T: Send,
    {
        if session.is_admin() {
            return Err(AccountError::NotPermitted(
                "administrator sessions have no favorites".to_string(),
            ));
        }

        self.accounts
            .update(&session.username, |account| apply(&mut account.favorites))
            .await
            .map_err(|e| e.for_user(&session.username))
    }
}

fn folder_name(name: &str) -> Result<String, AccountError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AccountError::InvalidInput(
            "Folder name must not be empty".to_string(),
        ));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Account, FavoritesError};
    use crate::infrastructure::{KvAccountRepository, MemoryStore, SecretsEncryption};

    async fn service() -> FavoritesService<KvAccountRepository<MemoryStore>> {
        let encryption = Arc::new(
            SecretsEncryption::new("YWJjZGVmZ2hpamtsbW5vcHFyc3R1dnd4eXoxMjM0NTY=").unwrap(),
        );
        let repo = Arc::new(KvAccountRepository::new(
            Arc::new(MemoryStore::new()),
            encryption,
        ));
        repo.create(&Account::new("mira".to_string(), "d".to_string(), 0))
            .await
            .unwrap();
        FavoritesService::new(repo)
    }

    #[tokio::test]
    async fn folder_lifecycle_persists() {
        let service = service().await;
        let session = Session::user("mira");

        let folder = service
            .create_folder(&session, Category::Avatars, " heads ")
            .await
            .unwrap();
        assert_eq!(folder.name, "heads");

        service
            .add(
                &session,
                "img-a",
                Category::Avatars,
                &FolderTarget::Folder(folder.id.clone()),
            )
            .await
            .unwrap();
        service
            .rename_folder(&session, Category::Avatars, &folder.id, "faces")
            .await
            .unwrap();

        let favorites = service.favorites(&session).await.unwrap();
        assert_eq!(favorites.avatars.folders[0].name, "faces");
        assert!(service.is_favorite(&session, "img-a").await.unwrap());

        service
            .delete_folder(&session, Category::Avatars, &folder.id)
            .await
            .unwrap();
        assert!(!service.is_favorite(&session, "img-a").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_folder_and_admin_are_rejected() {
        let service = service().await;
        let err = service
            .rename_folder(&Session::user("mira"), Category::Photos, "folder_0", "x")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AccountError::Favorites(FavoritesError::FolderNotFound(_))
        ));

        assert!(matches!(
            service
                .add(
                    &Session::admin("SeTkaProject"),
                    "img",
                    Category::Photos,
                    &FolderTarget::Root
                )
                .await,
            Err(AccountError::NotPermitted(_))
        ));
        assert!(matches!(
            service.remove(&Session::user("ghost"), "img").await,
            Err(AccountError::UserNotFound(_))
        ));
    }
}
