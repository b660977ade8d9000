use chrono::Utc;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Reference to a saved image (a URL or a data URL).
pub type ImageRef = String;

#[derive(Error, Debug, PartialEq)]
pub enum FavoritesError {
    #[error("Folder not found: {0}")]
    FolderNotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
pub enum Category {
    Photos,
    Avatars,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Photos, Category::Avatars];
}

/// Where a new favorite lands inside a category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderTarget {
    Root,
    Folder(String),
}

impl FolderTarget {
    /// `"root"` (or nothing) selects the root list, anything else is a folder id.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            None | Some("") | Some("root") => FolderTarget::Root,
            Some(id) => FolderTarget::Folder(id.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyFavorite,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
pub struct Folder {
    pub id: String,
    pub name: String,
    #[serde(default)]
    #[cfg_attr(feature = "server", schema(value_type = Vec<String>))]
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
pub struct FavoritesCollection {
    #[cfg_attr(feature = "server", schema(value_type = Vec<String>))]
    pub root: Vec<ImageRef>,
    pub folders: Vec<Folder>,
}

impl FavoritesCollection {
    pub fn images(&self) -> impl Iterator<Item = &ImageRef> {
        self.root
            .iter()
            .chain(self.folders.iter().flat_map(|f| f.images.iter()))
    }

    pub fn folder(&self, id: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.id == id)
    }

    fn folder_mut(&mut self, id: &str) -> Option<&mut Folder> {
        self.folders.iter_mut().find(|f| f.id == id)
    }

    fn remove_image(&mut self, image: &str) -> usize {
        let mut removed = 0;
        let before = self.root.len();
        self.root.retain(|i| i != image);
        removed += before - self.root.len();

        for folder in &mut self.folders {
            let before = folder.images.len();
            folder.images.retain(|i| i != image);
            removed += before - folder.images.len();
        }

        removed
    }
}

/// Saved images of one account. An image reference appears at most once
/// across both categories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
pub struct Favorites {
    pub photos: FavoritesCollection,
    pub avatars: FavoritesCollection,
}

impl Favorites {
    pub fn category(&self, category: Category) -> &FavoritesCollection {
        match category {
            Category::Photos => &self.photos,
            Category::Avatars => &self.avatars,
        }
    }

    pub fn category_mut(&mut self, category: Category) -> &mut FavoritesCollection {
        match category {
            Category::Photos => &mut self.photos,
            Category::Avatars => &mut self.avatars,
        }
    }

    pub fn images(&self) -> impl Iterator<Item = &ImageRef> {
        self.photos.images().chain(self.avatars.images())
    }

    pub fn contains(&self, image: &str) -> bool {
        self.images().any(|i| i == image)
    }

    pub fn len(&self) -> usize {
        self.images().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds `image` to the root or a folder of `category`.
    ///
    /// An image already saved anywhere (either category) is left where it is.
    pub fn add(
        &mut self,
        image: &str,
        category: Category,
        target: &FolderTarget,
    ) -> Result<AddOutcome, FavoritesError> {
        if self.contains(image) {
            return Ok(AddOutcome::AlreadyFavorite);
        }

        let collection = self.category_mut(category);
        match target {
            FolderTarget::Root => collection.root.push(image.to_string()),
            FolderTarget::Folder(id) => collection
                .folder_mut(id)
                .ok_or_else(|| FavoritesError::FolderNotFound(id.clone()))?
                .images
                .push(image.to_string()),
        }

        Ok(AddOutcome::Added)
    }

    /// Removes every occurrence of `image`, returning how many were dropped.
    pub fn remove(&mut self, image: &str) -> usize {
        Category::ALL
            .iter()
            .map(|c| self.category_mut(*c).remove_image(image))
            .sum()
    }

    pub fn create_folder(&mut self, category: Category, name: &str) -> Folder {
        let id = self.next_folder_id(Utc::now().timestamp_millis());
        let folder = Folder {
            id,
            name: name.to_string(),
            images: Vec::new(),
        };
        self.category_mut(category).folders.push(folder.clone());
        folder
    }

    pub fn rename_folder(
        &mut self,
        category: Category,
        folder_id: &str,
        name: &str,
    ) -> Result<(), FavoritesError> {
        let folder = self
            .category_mut(category)
            .folder_mut(folder_id)
            .ok_or_else(|| FavoritesError::FolderNotFound(folder_id.to_string()))?;
        folder.name = name.to_string();
        Ok(())
    }

    /// Drops the folder together with the images it holds.
    pub fn delete_folder(
        &mut self,
        category: Category,
        folder_id: &str,
    ) -> Result<Folder, FavoritesError> {
        let folders = &mut self.category_mut(category).folders;
        let index = folders
            .iter()
            .position(|f| f.id == folder_id)
            .ok_or_else(|| FavoritesError::FolderNotFound(folder_id.to_string()))?;
        Ok(folders.remove(index))
    }

    // Timestamp ids can collide when two folders are created in the same
    // millisecond; bump until free.
    fn next_folder_id(&self, mut millis: i64) -> String {
        loop {
            let id = format!("folder_{}", millis);
            let taken = Category::ALL
                .iter()
                .any(|c| self.category(*c).folder(&id).is_some());
            if !taken {
                return id;
            }
            millis += 1;
        }
    }
}
