//! End-to-end save → load round trips through the manager.

mod common;

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use common::*;
use graph_persistence_kernel::pipeline::{AesCbcEncryption, GzipCompression, Sha256Checksum};
use graph_persistence_kernel::{
    object, same_object, with_object, DataFormat, FileSaveStore, InMemorySaveStore, PersistenceConfig,
    PersistenceManager, Pipeline, SaveGroup, SemVer, StructuralError, StructuralPath, UserData,
};

fn party() -> (graph_persistence_kernel::ObjectRef, graph_persistence_kernel::ObjectRef) {
    let hero = object(Character::new("hero", 7));
    let sidekick = object(Character::new("sidekick", 3));
    let bag = object(Inventory {
        items: vec!["rope".to_string(), "lamp".to_string()],
        owner: Some(hero.clone()),
    });

    graph_persistence_kernel::with_object_mut::<Character, _>(&hero, |c| {
        c.friend = Some(sidekick.clone());
        c.inventory = Some(bag.clone());
        c.color = Some(object(Color(200, 10, 10)));
    });
    graph_persistence_kernel::with_object_mut::<Character, _>(&sidekick, |c| {
        c.friend = Some(hero.clone());
    });
    (hero, sidekick)
}

// ============================================================================
// Identity and cycles
// ============================================================================

#[tokio::test]
async fn test_round_trip_preserves_identity_and_cycles() {
    let store = Arc::new(InMemorySaveStore::new());
    let manager = manager(store, Pipeline::new(), SemVer::default());
    let (hero, sidekick) = party();

    let report = manager
        .save(
            "slot",
            vec![SaveGroup::new("world").with_root("hero", &hero).with_root("sidekick", &sidekick)],
            UserData::new(),
        )
        .await
        .unwrap();
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    // hero, sidekick, inventory; the color is inlined
    assert_eq!(report.node_count, 3);

    let loaded = manager.load("slot").await.unwrap().unwrap();
    assert!(loaded.diagnostics.is_empty(), "{:?}", loaded.diagnostics);

    let hero2 = loaded.root("world", "hero").unwrap();
    let sidekick2 = loaded.root("world", "sidekick").unwrap();
    assert!(!same_object(hero2, &hero));
    assert_eq!(name_of(hero2), "hero");
    assert_eq!(name_of(sidekick2), "sidekick");

    // Mutual cycle resolves to the rebuilt identities, not copies.
    assert!(same_object(&friend_of(hero2).unwrap(), sidekick2));
    assert!(same_object(&friend_of(sidekick2).unwrap(), hero2));

    // Hook-written data and the hook's back-reference.
    let bag = with_object::<Character, _>(hero2, |c| c.inventory.clone()).flatten().unwrap();
    let (items, owner) = with_object::<Inventory, _>(&bag, |i| (i.items.clone(), i.owner.clone())).unwrap();
    assert_eq!(items, vec!["rope".to_string(), "lamp".to_string()]);
    assert!(same_object(&owner.unwrap(), hero2));

    // Inlined plain value comes back as a fresh value.
    let color = with_object::<Character, _>(hero2, |c| c.color.clone()).flatten().unwrap();
    assert_eq!(with_object::<Color, _>(&color, |c| *c), Some(Color(200, 10, 10)));
}

#[tokio::test]
async fn test_self_reference_round_trip() {
    let manager = manager(Arc::new(InMemorySaveStore::new()), Pipeline::new(), SemVer::default());
    let narcissus = object(Character::new("narcissus", 1));
    graph_persistence_kernel::with_object_mut::<Character, _>(&narcissus, |c| c.friend = Some(narcissus.clone()));

    manager
        .save("slot", vec![SaveGroup::new("g").with_root("n", &narcissus)], UserData::new())
        .await
        .unwrap();
    let loaded = manager.load("slot").await.unwrap().unwrap();

    let n = loaded.root("g", "n").unwrap();
    assert!(same_object(&friend_of(n).unwrap(), n));
}

#[tokio::test]
async fn test_shared_reference_is_stored_once() {
    let manager = manager(Arc::new(InMemorySaveStore::new()), Pipeline::new(), SemVer::default());
    let mentor = object(Character::new("mentor", 50));
    let a = object(Character::new("a", 1));
    let b = object(Character::new("b", 1));
    for student in [&a, &b] {
        graph_persistence_kernel::with_object_mut::<Character, _>(student, |c| c.friend = Some(mentor.clone()));
    }

    let report = manager
        .save("slot", vec![SaveGroup::new("g").with_root("a", &a).with_root("b", &b)], UserData::new())
        .await
        .unwrap();
    assert_eq!(report.node_count, 3);

    let loaded = manager.load("slot").await.unwrap().unwrap();
    let ma = friend_of(loaded.root("g", "a").unwrap()).unwrap();
    let mb = friend_of(loaded.root("g", "b").unwrap()).unwrap();
    assert!(same_object(&ma, &mb));
    assert_eq!(name_of(&ma), "mentor");
}

// ============================================================================
// Converters, plain roots, external identities
// ============================================================================

#[tokio::test]
async fn test_converter_and_plain_roots() {
    let manager = manager(Arc::new(InMemorySaveStore::new()), Pipeline::new(), SemVer::default());
    let coin = object(Coin { value: 25 });
    let banner = object(Color(1, 2, 3));

    manager
        .save(
            "slot",
            vec![SaveGroup::new("g").with_root("coin", &coin).with_root("banner", &banner)],
            UserData::new(),
        )
        .await
        .unwrap();
    let loaded = manager.load("slot").await.unwrap().unwrap();

    let coin2 = loaded.root("g", "coin").unwrap();
    assert_eq!(with_object::<Coin, _>(coin2, |c| c.value), Some(25));
    let banner2 = loaded.root("g", "banner").unwrap();
    assert_eq!(with_object::<Color, _>(banner2, |c| *c), Some(Color(1, 2, 3)));
}

#[tokio::test]
async fn test_external_identity_is_referenced_not_copied() {
    let store = Arc::new(InMemorySaveStore::new());
    let manager = manager(store, Pipeline::new(), SemVer::default());
    let king = object(Character::new("king", 99));
    manager.register_asset("king", &king);

    let knight = object(Character::new("knight", 10));
    graph_persistence_kernel::with_object_mut::<Character, _>(&knight, |c| c.friend = Some(king.clone()));

    let report = manager
        .save("slot", vec![SaveGroup::new("g").with_root("knight", &knight)], UserData::new())
        .await
        .unwrap();
    assert_eq!(report.node_count, 1);

    let loaded = manager.load("slot").await.unwrap().unwrap();
    let friend = friend_of(loaded.root("g", "knight").unwrap()).unwrap();
    assert!(same_object(&friend, &king));
}

#[tokio::test]
async fn test_unknown_type_is_reported_not_fatal() {
    let store = Arc::new(InMemorySaveStore::new());
    let writer = manager(store.clone(), Pipeline::new(), SemVer::default());
    let a = object(Character::new("a", 1));
    let coin = object(Coin { value: 1 });
    writer
        .save("slot", vec![SaveGroup::new("g").with_root("a", &a).with_root("coin", &coin)], UserData::new())
        .await
        .unwrap();

    // A reader that knows Characters but has no Coin converter.
    let mut context = graph_persistence_kernel::PersistenceContext::default();
    context.types.register_default::<Character>();
    let reader = PersistenceManager::new(store, Pipeline::new(), SemVer::default(), context);

    let loaded = reader.load("slot").await.unwrap().unwrap();
    assert_eq!(name_of(loaded.root("g", "a").unwrap()), "a");
    assert!(loaded.root("g", "coin").is_none());
    assert!(loaded
        .diagnostics
        .errors()
        .iter()
        .any(|e| matches!(e, StructuralError::MissingConverter { .. })));
}

// ============================================================================
// Pipeline variants
// ============================================================================

#[tokio::test]
async fn test_every_format_round_trips() {
    for format in [DataFormat::Json, DataFormat::PrettyJson, DataFormat::MessagePack] {
        let pipeline = Pipeline::new()
            .with_format(format)
            .with_compression(GzipCompression::new(1))
            .with_encryption(AesCbcEncryption::new(&[9u8; 24], &[3u8; 16]).unwrap())
            .with_checksum(Sha256Checksum);
        let manager = manager(Arc::new(InMemorySaveStore::new()), pipeline, SemVer::default());
        let (hero, _) = party();

        manager
            .save("slot", vec![SaveGroup::new("world").with_root("hero", &hero)], UserData::new())
            .await
            .unwrap();
        let loaded = manager.load("slot").await.unwrap().unwrap();
        let hero2 = loaded.root("world", "hero").unwrap();
        assert_eq!(name_of(hero2), "hero", "format {}", format);
        assert_eq!(name_of(&friend_of(hero2).unwrap()), "sidekick");
    }
}

#[tokio::test]
async fn test_file_store_with_env_style_config() {
    let dir = TempDir::new().unwrap();
    let config = PersistenceConfig::from_lookup(|key| match key {
        "PERSIST_VERSION" => Some("2.1.0".to_string()),
        "PERSIST_COMPRESSION" => Some("gzip".to_string()),
        "PERSIST_AES_KEY" => Some(hex::encode([7u8; 32])),
        "PERSIST_AES_IV" => Some(hex::encode([1u8; 16])),
        "PERSIST_CHECKSUM" => Some("hmac_sha256".to_string()),
        "PERSIST_HMAC_KEY" => Some(hex::encode(b"integrity-key")),
        _ => None,
    })
    .unwrap();

    let store = Arc::new(FileSaveStore::new(dir.path()));
    let manager = PersistenceManager::from_config(store, &config, context()).unwrap();
    let (hero, _) = party();

    let mut user_data = UserData::new();
    user_data.insert("slot_label".to_string(), json!("Before the boss"));
    let report = manager
        .save("quick", vec![SaveGroup::new("world").with_root("hero", &hero)], user_data)
        .await
        .unwrap();
    assert_eq!(report.metadata.version, SemVer::new(2, 1, 0));
    assert_eq!(report.metadata.checksum_algorithm, "hmac-sha256");

    assert!(dir.path().join("quick.sav").exists());
    assert!(dir.path().join("quick.meta.json").exists());

    let metadata = manager.read_metadata("quick").await.unwrap().unwrap();
    assert_eq!(metadata.user_data.get("slot_label"), Some(&json!("Before the boss")));

    let loaded = manager.load("quick").await.unwrap().unwrap();
    assert_eq!(name_of(loaded.root("world", "hero").unwrap()), "hero");
    assert_eq!(
        loaded.objects.len(),
        3,
        "paths: {:?}",
        loaded.objects.keys().map(StructuralPath::to_string).collect::<Vec<_>>()
    );
}
