use domain::{DataOrder, DataPoint, DataType, PointAddress};
use edge_storage::{InMemoryPointStore, PointStore, StorageError};

fn point(uuid: &str, tag: &str) -> DataPoint {
    DataPoint {
        uuid: uuid.to_string(),
        device_uuid: "dev-1".to_string(),
        tag: tag.to_string(),
        alias: String::new(),
        address: PointAddress::Modbus {
            function: 3,
            slave_id: 1,
            register: 0,
            quantity: 1,
        },
        data_type: DataType::Int16,
        data_order: DataOrder::Ab,
        weight: 1.0,
        frequency_ms: 1000,
    }
}

#[tokio::test]
async fn point_in_memory_crud() {
    let store = InMemoryPointStore::new();
    store.upsert_point(point("p2", "b_tag")).await.expect("create");
    store.upsert_point(point("p1", "a_tag")).await.expect("create");

    let list = store.list_points("dev-1").await.expect("list");
    let tags: Vec<_> = list.iter().map(|p| p.tag.as_str()).collect();
    assert_eq!(tags, vec!["a_tag", "b_tag"]);

    let mut renamed = point("p1", "c_tag");
    renamed.alias = "renamed".to_string();
    store.upsert_point(renamed).await.expect("update");
    let got = store.find_point("dev-1", "p1").await.expect("find").unwrap();
    assert_eq!(got.alias, "renamed");

    let removed = store
        .delete_points("dev-1", &["p1".to_string(), "nope".to_string()])
        .await
        .expect("delete");
    assert_eq!(removed, 1);
    assert_eq!(store.delete_device("dev-1").await.unwrap(), 1);
    assert!(store.list_points("dev-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_tag_is_conflict() {
    let store = InMemoryPointStore::new();
    store.upsert_point(point("p1", "temp")).await.unwrap();
    let err = store.upsert_point(point("p2", "temp")).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));
}

#[tokio::test]
async fn invalid_points_are_rejected() {
    let store = InMemoryPointStore::new();

    let mut zero_weight = point("p1", "temp");
    zero_weight.weight = 0.0;
    assert!(matches!(
        store.upsert_point(zero_weight).await,
        Err(StorageError::Invalid(_))
    ));

    assert!(store.upsert_point(point("p1", "9lives")).await.is_err());

    let mut too_narrow = point("p1", "wide");
    too_narrow.data_type = DataType::Float32;
    assert!(store.upsert_point(too_narrow).await.is_err());

    let mut write_fc = point("p1", "coil");
    write_fc.address = PointAddress::Modbus {
        function: 6,
        slave_id: 1,
        register: 0,
        quantity: 1,
    };
    assert!(store.upsert_point(write_fc).await.is_err());
}

#[tokio::test]
async fn frequency_is_clamped() {
    let store = InMemoryPointStore::new();
    let mut fast = point("p1", "fast");
    fast.frequency_ms = 1;
    assert_eq!(store.upsert_point(fast).await.unwrap().frequency_ms, 50);

    let mut slow = point("p2", "slow");
    slow.frequency_ms = 1_000_000;
    assert_eq!(store.upsert_point(slow).await.unwrap().frequency_ms, 100_000);
}
