use std::collections::HashSet;

use bson::oid::ObjectId;
use mongodb::{options::IndexOptions, IndexModel};
use serde::{Deserialize, Serialize};

use crate::{api::v1::auth::UserCollection, error::Error, mongo_ext::Collection};

#[derive(Serialize, Deserialize)]
pub struct MigrateModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub version: i64,
}

#[derive(Clone)]
pub struct MigrationCollection(pub Collection<MigrateModel>);

impl std::ops::Deref for MigrationCollection {
    type Target = Collection<MigrateModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Backstop for the application-level duplicate check: concurrent registrations
// with the same email still collide here.
async fn v1_unique_email_index(users: &UserCollection) -> Result<(), mongodb::error::Error> {
    users
        .create_index(
            IndexModel::builder()
                .keys(bson::doc! {"email": 1})
                .options(IndexOptions::builder().unique(true).build())
                .build(),
            None,
        )
        .await?;

    Ok(())
}

pub async fn run_migration(
    migrations: &MigrationCollection,
    users: &UserCollection,
) -> Result<(), Error> {
    let applied: HashSet<i64> = migrations
        .collect_all(None)
        .await?
        .into_iter()
        .map(|it| it.version)
        .collect();

    macro_rules! migrate {
        ($version:expr, $fun:expr) => {
            if !applied.contains(&$version) {
                tracing::debug!("running migration version {}", $version);
                $fun.await?;
                migrations
                    .insert_one(
                        MigrateModel {
                            id: ObjectId::new(),
                            version: $version,
                        },
                        None,
                    )
                    .await?;
            }
        };
    }

    migrate!(1, v1_unique_email_index(users));

    Ok(())
}
