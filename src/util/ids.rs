//! Platform-style object identifiers.
//!
//! Parse stores 10-character alphanumeric ids. New rows get ids in the same shape,
//! and inserts go through [`insert_with_fresh_id`] so a collision draws a new id
//! instead of failing or silently clobbering.
use anyhow::Result;
use futures::future::BoxFuture;
use rand::{distributions::Alphanumeric, Rng};
use tracing::warn;

use crate::error::UpkeepError;

pub const OBJECT_ID_LEN: usize = 10;
pub const MAX_ID_ATTEMPTS: usize = 5;

pub fn new_object_id() -> String {
    new_object_id_with(&mut rand::thread_rng())
}

pub fn new_object_id_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..OBJECT_ID_LEN)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}

/// Run `insert` with fresh ids until it reports a row was written.
///
/// `insert` returns `Ok(false)` when the id was already taken (the SQL uses
/// `ON CONFLICT ("objectId") DO NOTHING`), which keeps an open transaction usable.
/// The connection is handed back to the closure on every attempt.
pub async fn insert_with_fresh_id<C, F>(
    table: &'static str,
    conn: &mut C,
    mut insert: F,
) -> Result<String>
where
    C: ?Sized + Send,
    F: for<'c> FnMut(&'c mut C, String) -> BoxFuture<'c, Result<bool>>,
{
    for attempt in 1..=MAX_ID_ATTEMPTS {
        let id = new_object_id();
        if insert(&mut *conn, id.clone()).await? {
            return Ok(id);
        }
        warn!(table, attempt, object_id = %id, "objectId collision; drawing a new one");
    }
    Err(UpkeepError::IdExhausted {
        table,
        attempts: MAX_ID_ATTEMPTS,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn ids_match_platform_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let id = new_object_id_with(&mut rng);
            assert_eq!(id.len(), OBJECT_ID_LEN);
            assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[tokio::test]
    async fn retries_after_collision() {
        let mut calls = 0usize;
        let id = insert_with_fresh_id("Discipline_Preset", &mut calls, |calls, _id| {
            *calls += 1;
            let inserted = *calls == 3;
            Box::pin(async move { Ok(inserted) })
        })
        .await
        .unwrap();
        assert_eq!(calls, 3);
        assert_eq!(id.len(), OBJECT_ID_LEN);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let err = insert_with_fresh_id("Fee", &mut (), |_conn, _id| Box::pin(async { Ok(false) }))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpkeepError>(),
            Some(UpkeepError::IdExhausted { attempts: MAX_ID_ATTEMPTS, .. })
        ));
    }
}
