use std::ops::{Deref, DerefMut};

use bson::{oid::ObjectId, Document};
use serde::de::DeserializeOwned;

use crate::error::Error;

pub struct Collection<T>(pub mongodb::Collection<T>);

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Collection<T> {
    type Target = mongodb::Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for Collection<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<T> From<mongodb::Collection<T>> for Collection<T> {
    fn from(value: mongodb::Collection<T>) -> Self {
        Self(value)
    }
}

impl<T> Collection<T>
where
    T: DeserializeOwned + Send + Sync + Unpin,
{
    pub async fn find_one_by_id(&self, id: ObjectId) -> Result<Option<T>, Error> {
        self.find_one(
            bson::doc! {
                "_id": id,
            },
            None,
        )
        .await
        .map_err(Into::into)
    }

    pub async fn collect_all(&self, filter: impl Into<Option<Document>>) -> Result<Vec<T>, Error> {
        let mut cursor = self.find(filter, None).await?;

        let mut items = vec![];

        while cursor.advance().await? {
            items.push(cursor.deserialize_current()?);
        }

        Ok(items)
    }
}
