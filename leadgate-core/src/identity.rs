//! Identity reconciliation.
//!
//! The WhatsApp transport can present two identifier shapes for one human:
//! a phone-style primary jid and a linked-device alternate. The resolver
//! guarantees at most one lead per observed `(primary, alt)` pair, merging
//! or migrating rows when a pair is seen for the first time.

use sqlx::SqliteConnection;

use crate::lead::Lead;
use crate::store::{LeadStore, StoreError};

impl LeadStore {
    /// Resolve the lead for an observed `(primary, alt)` identifier pair.
    ///
    /// Runs inside the caller's transaction. Cases:
    ///
    /// 1. Lead keyed by `primary` exists: return it (recording `alt` when
    ///    it has none).
    /// 2. Only a lead matching `alt` exists: migrate it to `primary` and
    ///    return it.
    /// 3. Separate leads exist for both: re-parent the alt-only lead's
    ///    interactions onto the primary lead, delete the alt-only row, and
    ///    attach `alt` to the survivor. History is never dropped.
    /// 4. Neither exists: return `None`; the caller creates.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a query fails.
    pub async fn resolve_identity(
        &self,
        conn: &mut SqliteConnection,
        primary: &str,
        alt: Option<&str>,
    ) -> Result<Option<Lead>, StoreError> {
        let primary_lead = self.get_by_primary(&mut *conn, primary).await?;

        let Some(alt) = alt.filter(|a| !a.is_empty() && *a != primary) else {
            return Ok(primary_lead);
        };

        // An alt-only lead from a sync import is keyed by the alt id itself;
        // a previously migrated lead carries it in alt_id.
        let alt_lead = match self.get_by_primary(&mut *conn, alt).await? {
            Some(lead) => Some(lead),
            None => self.get_by_alt(&mut *conn, alt).await?,
        };

        match (primary_lead, alt_lead) {
            (Some(primary_lead), Some(alt_lead)) if primary_lead.lead_id == alt_lead.lead_id => {
                Ok(Some(primary_lead))
            }
            (Some(primary_lead), Some(alt_lead)) => {
                // Split-brain: two rows for one human.
                let moved = self
                    .reparent_interactions(&mut *conn, alt_lead.lead_id, primary_lead.lead_id)
                    .await?;
                if moved > 0 {
                    tracing::info!(
                        "re-parented {} interactions from {} to {}",
                        moved,
                        alt_lead.lead_id,
                        primary_lead.lead_id
                    );
                }
                self.delete_lead(&mut *conn, alt_lead.lead_id).await?;
                self.set_identity(&mut *conn, primary_lead.lead_id, primary, Some(alt))
                    .await?;
                tracing::info!(
                    "merged split identity: {} absorbed {}",
                    primary_lead.lead_id,
                    alt_lead.lead_id
                );
                self.get_by_lead_id(&mut *conn, primary_lead.lead_id).await
            }
            (Some(primary_lead), None) => {
                if primary_lead.alt_id.is_none() {
                    self.set_identity(&mut *conn, primary_lead.lead_id, primary, Some(alt))
                        .await?;
                    return self.get_by_lead_id(&mut *conn, primary_lead.lead_id).await;
                }
                Ok(Some(primary_lead))
            }
            (None, Some(alt_lead)) => {
                // Migrate the alt-keyed lead to the canonical primary id.
                self.set_identity(&mut *conn, alt_lead.lead_id, primary, Some(alt))
                    .await?;
                tracing::info!("migrated lead {} to primary id {}", alt_lead.lead_id, primary);
                self.get_by_lead_id(&mut *conn, alt_lead.lead_id).await
            }
            (None, None) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::lead::{Direction, Lead, Transport};
    use crate::state::LeadState;
    use crate::store::LeadStore;

    const PHONE: &str = "628123456789@s.whatsapp.net";
    const LID: &str = "99887:12@lid";

    async fn create_test_store() -> LeadStore {
        let db_path =
            std::env::temp_dir().join(format!("leadgate_identity_{}.db", Uuid::new_v4()));
        LeadStore::new(&format!("sqlite:{}", db_path.display()))
            .await
            .expect("failed to create test store")
    }

    #[tokio::test]
    async fn test_primary_only() {
        let store = create_test_store().await;
        let mut tx = store.begin().await.unwrap();

        let lead = Lead::new(PHONE, Transport::Whatsapp, LeadState::ChooseOption);
        store.create(&mut tx, &lead).await.unwrap();

        let resolved = store
            .resolve_identity(&mut tx, PHONE, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.lead_id, lead.lead_id);
    }

    #[tokio::test]
    async fn test_primary_gains_alt() {
        let store = create_test_store().await;
        let mut tx = store.begin().await.unwrap();

        let lead = Lead::new(PHONE, Transport::Whatsapp, LeadState::ChooseOption);
        store.create(&mut tx, &lead).await.unwrap();

        let resolved = store
            .resolve_identity(&mut tx, PHONE, Some(LID))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.lead_id, lead.lead_id);
        assert_eq!(resolved.alt_id.as_deref(), Some(LID));
    }

    #[tokio::test]
    async fn test_alt_only_lead_is_migrated() {
        let store = create_test_store().await;
        let mut tx = store.begin().await.unwrap();

        // Sync import created the lead keyed by the lid.
        let imported = Lead::new(LID, Transport::Whatsapp, LeadState::Existing);
        store.create(&mut tx, &imported).await.unwrap();

        let resolved = store
            .resolve_identity(&mut tx, PHONE, Some(LID))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.lead_id, imported.lead_id);
        assert_eq!(resolved.primary_id, PHONE);
        assert_eq!(resolved.alt_id.as_deref(), Some(LID));

        // The old key no longer resolves to a separate lead.
        assert!(store.get_by_primary(&mut tx, LID).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_split_brain_merges_and_keeps_history() {
        let store = create_test_store().await;
        let mut tx = store.begin().await.unwrap();

        let phone_lead = Lead::new(PHONE, Transport::Whatsapp, LeadState::ChooseOption);
        store.create(&mut tx, &phone_lead).await.unwrap();

        let lid_lead = Lead::new(LID, Transport::Whatsapp, LeadState::Existing);
        store.create(&mut tx, &lid_lead).await.unwrap();
        store
            .add_interaction(&mut tx, lid_lead.lead_id, "m-old", "old message", Direction::In)
            .await
            .unwrap();

        let resolved = store
            .resolve_identity(&mut tx, PHONE, Some(LID))
            .await
            .unwrap()
            .unwrap();

        // The phone lead survives with the alt attached.
        assert_eq!(resolved.lead_id, phone_lead.lead_id);
        assert_eq!(resolved.alt_id.as_deref(), Some(LID));

        // The lid lead is gone; its history moved over.
        assert!(store.get_by_primary(&mut tx, LID).await.unwrap().is_none());
        let log = store
            .get_interactions(&mut tx, phone_lead.lead_id)
            .await
            .unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message_id, "m-old");
    }

    #[tokio::test]
    async fn test_neither_known() {
        let store = create_test_store().await;
        let mut tx = store.begin().await.unwrap();

        let resolved = store
            .resolve_identity(&mut tx, PHONE, Some(LID))
            .await
            .unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_alt_equal_to_primary_is_ignored() {
        let store = create_test_store().await;
        let mut tx = store.begin().await.unwrap();

        let lead = Lead::new(PHONE, Transport::Whatsapp, LeadState::ChooseOption);
        store.create(&mut tx, &lead).await.unwrap();

        let resolved = store
            .resolve_identity(&mut tx, PHONE, Some(PHONE))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.alt_id, None);
    }
}
