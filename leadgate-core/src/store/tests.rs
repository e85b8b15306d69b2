use std::env::temp_dir;

use super::*;

const USER: &str = "628123456789@s.whatsapp.net";

/// Create a temporary database for testing.
async fn create_test_store() -> LeadStore {
    let db_path = temp_dir().join(format!("leadgate_test_{}.db", Uuid::new_v4()));
    let url = format!("sqlite:{}", db_path.display());
    LeadStore::new(&url)
        .await
        .expect("failed to create test store")
}

#[tokio::test]
async fn test_create_and_get_lead() {
    let store = create_test_store().await;
    let mut tx = store.begin().await.unwrap();

    let lead = Lead::new(USER, Transport::Whatsapp, LeadState::New).with_push_name("Budi");
    store.create(&mut tx, &lead).await.expect("create failed");

    let by_primary = store.get_by_primary(&mut tx, USER).await.unwrap().unwrap();
    assert_eq!(by_primary, lead);

    let by_lead_id = store
        .get_by_lead_id(&mut tx, lead.lead_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_lead_id.primary_id, USER);

    assert!(store.get_by_primary(&mut tx, "nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn test_primary_id_unique() {
    let store = create_test_store().await;
    let mut tx = store.begin().await.unwrap();

    let first = Lead::new(USER, Transport::Whatsapp, LeadState::New);
    store.create(&mut tx, &first).await.unwrap();

    let duplicate = Lead::new(USER, Transport::Whatsapp, LeadState::New);
    let result = store.create(&mut tx, &duplicate).await;
    assert!(matches!(result, Err(StoreError::Database(_))));
}

#[tokio::test]
async fn test_get_by_alt() {
    let store = create_test_store().await;
    let mut tx = store.begin().await.unwrap();

    let lead = Lead::new(USER, Transport::Whatsapp, LeadState::New).with_alt_id("99887:12@lid");
    store.create(&mut tx, &lead).await.unwrap();

    let found = store
        .get_by_alt(&mut tx, "99887:12@lid")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.lead_id, lead.lead_id);
    assert!(store.get_by_alt(&mut tx, "other@lid").await.unwrap().is_none());
}

#[tokio::test]
async fn test_get_or_create_creates_new() {
    let store = create_test_store().await;
    let mut tx = store.begin().await.unwrap();

    let (lead, is_new) = store
        .get_or_create(
            &mut tx,
            USER,
            Transport::Whatsapp,
            LeadOptions {
                push_name: Some("Budi".to_string()),
                alt_id: None,
            },
        )
        .await
        .unwrap();

    assert!(is_new);
    assert_eq!(lead.state, LeadState::New);
    assert_eq!(lead.push_name.as_deref(), Some("Budi"));
}

#[tokio::test]
async fn test_get_or_create_refreshes_metadata() {
    let store = create_test_store().await;
    let mut tx = store.begin().await.unwrap();

    let (created, _) = store
        .get_or_create(&mut tx, USER, Transport::Whatsapp, LeadOptions::default())
        .await
        .unwrap();
    assert_eq!(created.push_name, None);
    assert_eq!(created.alt_id, None);

    // New push_name and alt_id are picked up.
    let (updated, is_new) = store
        .get_or_create(
            &mut tx,
            USER,
            Transport::Whatsapp,
            LeadOptions {
                push_name: Some("Budi".to_string()),
                alt_id: Some("99887:12@lid".to_string()),
            },
        )
        .await
        .unwrap();
    assert!(!is_new);
    assert_eq!(updated.lead_id, created.lead_id);
    assert_eq!(updated.push_name.as_deref(), Some("Budi"));
    assert_eq!(updated.alt_id.as_deref(), Some("99887:12@lid"));

    // A stored alt_id is not overwritten by a different one.
    let (unchanged, _) = store
        .get_or_create(
            &mut tx,
            USER,
            Transport::Whatsapp,
            LeadOptions {
                push_name: Some("Budi".to_string()),
                alt_id: Some("different@lid".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(unchanged.alt_id.as_deref(), Some("99887:12@lid"));
}

#[tokio::test]
async fn test_mark_existing_creates_silent_lead() {
    let store = create_test_store().await;
    let mut tx = store.begin().await.unwrap();

    let lead = store
        .mark_existing(&mut tx, USER, Transport::Whatsapp)
        .await
        .unwrap();
    assert_eq!(lead.state, LeadState::Existing);
}

#[tokio::test]
async fn test_mark_existing_moves_new_only() {
    let store = create_test_store().await;
    let mut tx = store.begin().await.unwrap();

    let (created, _) = store
        .get_or_create(&mut tx, USER, Transport::Whatsapp, LeadOptions::default())
        .await
        .unwrap();
    assert_eq!(created.state, LeadState::New);

    let moved = store
        .mark_existing(&mut tx, USER, Transport::Whatsapp)
        .await
        .unwrap();
    assert_eq!(moved.state, LeadState::Existing);

    // A lead mid-funnel is left where it is.
    let other = Lead::new("628999@s.whatsapp.net", Transport::Whatsapp, LeadState::ChooseOption);
    store.create(&mut tx, &other).await.unwrap();
    let untouched = store
        .mark_existing(&mut tx, "628999@s.whatsapp.net", Transport::Whatsapp)
        .await
        .unwrap();
    assert_eq!(untouched.state, LeadState::ChooseOption);
}

#[tokio::test]
async fn test_update_state_validates_transition() {
    let store = create_test_store().await;
    let mut tx = store.begin().await.unwrap();

    let lead = Lead::new(USER, Transport::Whatsapp, LeadState::New);
    store.create(&mut tx, &lead).await.unwrap();

    let updated = store
        .update_state(&mut tx, lead.lead_id, LeadState::ChooseOption)
        .await
        .unwrap();
    assert_eq!(updated.state, LeadState::ChooseOption);

    // CHOOSE_OPTION -> FORM_COMPLETED is not in the table.
    let result = store
        .update_state(&mut tx, lead.lead_id, LeadState::FormCompleted)
        .await;
    assert!(matches!(
        result,
        Err(StoreError::State(StateError::InvalidTransition { .. }))
    ));

    // Row unchanged after the rejected transition.
    let reloaded = store.get_by_lead_id(&mut tx, lead.lead_id).await.unwrap().unwrap();
    assert_eq!(reloaded.state, LeadState::ChooseOption);
}

#[tokio::test]
async fn test_update_state_not_found() {
    let store = create_test_store().await;
    let mut tx = store.begin().await.unwrap();

    let result = store
        .update_state(&mut tx, Uuid::new_v4(), LeadState::ChooseOption)
        .await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_warning_counter() {
    let store = create_test_store().await;
    let mut tx = store.begin().await.unwrap();

    let lead = Lead::new(USER, Transport::Whatsapp, LeadState::ChooseOption);
    store.create(&mut tx, &lead).await.unwrap();

    let (l1, escalate1) = store.increment_warning(&mut tx, lead.lead_id, 3).await.unwrap();
    assert_eq!(l1.warning_count, 1);
    assert!(!escalate1);

    let (l2, escalate2) = store.increment_warning(&mut tx, lead.lead_id, 3).await.unwrap();
    assert_eq!(l2.warning_count, 2);
    assert!(!escalate2);

    let (l3, escalate3) = store.increment_warning(&mut tx, lead.lead_id, 3).await.unwrap();
    assert_eq!(l3.warning_count, 3);
    assert!(escalate3);

    store.reset_warning(&mut tx, lead.lead_id).await.unwrap();
    let reloaded = store.get_by_lead_id(&mut tx, lead.lead_id).await.unwrap().unwrap();
    assert_eq!(reloaded.warning_count, 0);
}

#[tokio::test]
async fn test_interaction_log() {
    let store = create_test_store().await;
    let mut tx = store.begin().await.unwrap();

    let lead = Lead::new(USER, Transport::Whatsapp, LeadState::New);
    store.create(&mut tx, &lead).await.unwrap();

    store
        .add_interaction(&mut tx, lead.lead_id, "m1", "Halo", Direction::In)
        .await
        .unwrap();
    store
        .add_interaction(&mut tx, lead.lead_id, "m1-reply", "Selamat datang", Direction::Out)
        .await
        .unwrap();

    let log = store.get_interactions(&mut tx, lead.lead_id).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].message_id, "m1");
    assert_eq!(log[0].direction, Direction::In);
    assert_eq!(log[1].direction, Direction::Out);
}

#[tokio::test]
async fn test_upsert_form_merges_fieldwise() {
    let store = create_test_store().await;
    let mut tx = store.begin().await.unwrap();

    let lead = Lead::new(USER, Transport::Whatsapp, LeadState::FormInProgress);
    store.create(&mut tx, &lead).await.unwrap();

    assert!(store.get_form(&mut tx, lead.lead_id).await.unwrap().is_none());

    let first = FormFields {
        biodata: Some("Budi, Jakarta".to_string()),
        budget: Some("50 juta".to_string()),
        ..FormFields::default()
    };
    let fragment = store.upsert_form(&mut tx, lead.lead_id, &first).await.unwrap();
    assert!(!fragment.completed);
    assert_eq!(fragment.fields.biodata.as_deref(), Some("Budi, Jakarta"));

    // Second upsert: non-null wins, null preserves.
    let second = FormFields {
        budget: Some("100 juta".to_string()),
        source_info: Some("Instagram".to_string()),
        ..FormFields::default()
    };
    let merged = store.upsert_form(&mut tx, lead.lead_id, &second).await.unwrap();
    assert_eq!(merged.fields.biodata.as_deref(), Some("Budi, Jakarta"));
    assert_eq!(merged.fields.budget.as_deref(), Some("100 juta"));
    assert_eq!(merged.fields.source_info.as_deref(), Some("Instagram"));

    let stored = store.get_form(&mut tx, lead.lead_id).await.unwrap().unwrap();
    assert_eq!(stored.fields, merged.fields);
}

#[tokio::test]
async fn test_mark_form_completed() {
    let store = create_test_store().await;
    let mut tx = store.begin().await.unwrap();

    let lead = Lead::new(USER, Transport::Whatsapp, LeadState::FormInProgress);
    store.create(&mut tx, &lead).await.unwrap();

    // No fragment row yet.
    let result = store.mark_form_completed(&mut tx, lead.lead_id).await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));

    store
        .upsert_form(&mut tx, lead.lead_id, &FormFields::default())
        .await
        .unwrap();
    store.mark_form_completed(&mut tx, lead.lead_id).await.unwrap();

    let fragment = store.get_form(&mut tx, lead.lead_id).await.unwrap().unwrap();
    assert!(fragment.completed);
}

#[tokio::test]
async fn test_set_identity_and_reparent() {
    let store = create_test_store().await;
    let mut tx = store.begin().await.unwrap();

    let lid_lead = Lead::new("99887:12@lid", Transport::Whatsapp, LeadState::ChooseOption);
    store.create(&mut tx, &lid_lead).await.unwrap();
    store
        .add_interaction(&mut tx, lid_lead.lead_id, "m1", "Halo", Direction::In)
        .await
        .unwrap();

    let phone_lead = Lead::new(USER, Transport::Whatsapp, LeadState::Existing);
    store.create(&mut tx, &phone_lead).await.unwrap();

    let moved = store
        .reparent_interactions(&mut tx, lid_lead.lead_id, phone_lead.lead_id)
        .await
        .unwrap();
    assert_eq!(moved, 1);
    assert_eq!(
        store.get_interactions(&mut tx, phone_lead.lead_id).await.unwrap().len(),
        1
    );

    assert!(store.delete_lead(&mut tx, lid_lead.lead_id).await.unwrap());
    assert!(store.get_by_primary(&mut tx, "99887:12@lid").await.unwrap().is_none());

    store
        .set_identity(&mut tx, phone_lead.lead_id, USER, Some("99887:12@lid"))
        .await
        .unwrap();
    let updated = store.get_by_primary(&mut tx, USER).await.unwrap().unwrap();
    assert_eq!(updated.alt_id.as_deref(), Some("99887:12@lid"));
}

#[tokio::test]
async fn test_delete_cascades_to_child_rows() {
    let store = create_test_store().await;
    let mut tx = store.begin().await.unwrap();

    let lead = Lead::new(USER, Transport::Whatsapp, LeadState::FormInProgress);
    store.create(&mut tx, &lead).await.unwrap();
    store
        .add_interaction(&mut tx, lead.lead_id, "m1", "Halo", Direction::In)
        .await
        .unwrap();
    store
        .upsert_form(&mut tx, lead.lead_id, &FormFields::default())
        .await
        .unwrap();

    assert!(store.delete_lead(&mut tx, lead.lead_id).await.unwrap());
    assert!(store.get_interactions(&mut tx, lead.lead_id).await.unwrap().is_empty());
    assert!(store.get_form(&mut tx, lead.lead_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_rollback_discards_changes() {
    let store = create_test_store().await;

    let lead = Lead::new(USER, Transport::Whatsapp, LeadState::New);
    {
        let mut tx = store.begin().await.unwrap();
        store.create(&mut tx, &lead).await.unwrap();
        tx.rollback().await.unwrap();
    }

    let mut tx = store.begin().await.unwrap();
    assert!(store.get_by_primary(&mut tx, USER).await.unwrap().is_none());
}

#[tokio::test]
async fn test_commit_persists_changes() {
    let store = create_test_store().await;

    let lead = Lead::new(USER, Transport::Whatsapp, LeadState::New);
    {
        let mut tx = store.begin().await.unwrap();
        store.create(&mut tx, &lead).await.unwrap();
        tx.commit().await.unwrap();
    }

    let mut tx = store.begin().await.unwrap();
    assert!(store.get_by_primary(&mut tx, USER).await.unwrap().is_some());
}
