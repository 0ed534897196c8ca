//! Records fetched through operations.

mod common;

use common::{CAVES, DEFECTS, EXHIBITS, seeded};
use heritagedb::{
    CaveRecord, DbError, DefectRecord, ExhibitRecord, MuralRecord, OperationCall, StatueRecord,
    Value,
};
use tempfile::TempDir;

#[tokio::test]
async fn test_cave_record_with_reference_child() {
    let dir = TempDir::new().unwrap();
    let engine = seeded(&dir).await;
    engine
        .execute_batch(
            CAVES,
            vec![
                OperationCall::new(
                    "createCave",
                    vec![
                        Value::from("cave-test"),
                        Value::from("Cave 16"),
                        Value::from("Library Cave"),
                    ],
                ),
                OperationCall::new(
                    "setCaveModel",
                    vec![Value::from("cave-test"), Value::from("m.glb")],
                ),
            ],
        )
        .await
        .unwrap();

    let cave: CaveRecord = engine
        .fetch_record(CAVES, "getCaveByGid", vec![Value::from("cave-test")])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cave.gid, "cave-test");
    assert_eq!(cave.name, "Cave 16");
    assert_eq!(cave.label, "Library Cave");
    assert_eq!(cave.reference.unwrap().model_location, "m.glb");
    assert!(cave.exhibits.is_empty());
}

#[tokio::test]
async fn test_children_are_nested_one_level() {
    let dir = TempDir::new().unwrap();
    let engine = seeded(&dir).await;

    let cave: CaveRecord = engine
        .fetch_record(CAVES, "getCaveByGid", vec![Value::from("cave-16")])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cave.environment_conditions.len(), 1);
    // `reading` sits two levels below the cave.
    assert!(cave.environment_conditions[0].reading.is_none());
    assert_eq!(cave.exhibits.len(), 1);
    assert_eq!(cave.exhibits[0].name, "Statue of Hongbian");
    assert!(cave.exhibits[0].defects.is_empty());

    let coordinates = cave.coordinates.unwrap();
    assert_eq!(coordinates.x, 12.5);
    assert_eq!(coordinates.z, -3.25);

    let statue: StatueRecord = engine
        .fetch_record(EXHIBITS, "getExhibitByGid", vec![Value::from("statue-hongbian")])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(statue.catalog_number, 17);
    assert_eq!(statue.conservation_status, "monitored");
    assert_eq!(statue.defects.len(), 1);
    assert_eq!(statue.defects[0].severity, "moderate");
}

#[tokio::test]
async fn test_collections_and_missing_nodes() {
    let dir = TempDir::new().unwrap();
    let engine = seeded(&dir).await;

    let exhibits: Vec<ExhibitRecord> = engine
        .fetch_records(EXHIBITS, "getAllExhibits", vec![])
        .await
        .unwrap();
    let names: Vec<_> = exhibits.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Statue of Hongbian", "Guanyin Sutra tableau"]);

    let defects: Vec<DefectRecord> = engine
        .fetch_records(DEFECTS, "getDefectsBySeverity", vec![Value::from("critical")])
        .await
        .unwrap();
    assert!(defects.is_empty());

    let missing: Option<CaveRecord> = engine
        .fetch_record(CAVES, "getCaveByGid", vec![Value::from("cave-99")])
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_wrong_record_type_is_conversion_error() {
    let dir = TempDir::new().unwrap();
    let engine = seeded(&dir).await;

    let err = engine
        .fetch_record::<MuralRecord>(EXHIBITS, "getExhibitByGid", vec![Value::from("statue-hongbian")])
        .await
        .unwrap_err();
    match err {
        DbError::Conversion { record, source } => {
            assert_eq!(record, "MuralRecord");
            assert!(matches!(*source, DbError::TypeMismatch(_)));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let err = engine
        .fetch_record::<CaveRecord>(CAVES, "countCaves", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Conversion { .. }));
    assert_eq!(engine.stats().failures, 2);
}

#[tokio::test]
async fn test_records_serialize_for_the_wire() {
    let dir = TempDir::new().unwrap();
    let engine = seeded(&dir).await;

    let mural: MuralRecord = engine
        .fetch_record(EXHIBITS, "getExhibitByGid", vec![Value::from("mural-guanyin")])
        .await
        .unwrap()
        .unwrap();
    let json = serde_json::to_value(&mural).unwrap();
    assert_eq!(json["gid"], "mural-guanyin");
    assert_eq!(json["catalogNumber"], 45);
    assert_eq!(json["conservationStatus"], "stable");
    assert_eq!(json["technique"], "secco");
    assert!(json["reference"].is_null());
}
