use crate::record;

record! {
    /// Locations of the 3D model and side files attached to a node.
    pub struct AssetReferenceRecord("AssetReference") {
        model_location: String = "modelLocation",
        metadata_location: String = "metadataLocation",
        texture_location: String = "textureLocation",
    }
}

record! {
    pub struct CoordinatesRecord("Coordinates") {
        x: f32 = "x",
        y: f32 = "y",
        z: f32 = "z",
    }
}

record! {
    pub struct ParameterRecord("Parameter") {
        expression: String = "expression",
        value: f64 = "value",
        unit: String = "unit",
    }
}

record! {
    /// A monitored environment reading (temperature, humidity, ...).
    pub struct EnvironmentConditionRecord("EnvironmentCondition") {
        name: String = "name",
        description: String = "description",
        condition_type: String = "conditionType",
        timestamp: i64 = "timestamp",
    }
    children {
        reading: Option<ParameterRecord> = "reading",
    }
}

record! {
    pub struct DefectRecord("Defect") {
        name: String = "name",
        description: String = "description",
        defect_type: String = "defectType",
        severity: String = "severity",
        detection_date: i64 = "detectionDate",
        affected_area: f64 = "affectedArea",
        treatment_history: String = "treatmentHistory",
        requires_immediate_action: bool = "requiresImmediateAction",
    }
    children {
        reference: Option<AssetReferenceRecord> = "reference",
        coordinates: Option<CoordinatesRecord> = "coordinates",
    }
}

record! {
    /// Any exhibit, projected through the fields all exhibit kinds share.
    pub struct ExhibitRecord("Exhibit") {
        name: String = "name",
        description: String = "description",
        label: String = "label",
        creation_period: String = "creationPeriod",
        last_inspection_date: i64 = "lastInspectionDate",
        inspection_notes: String = "inspectionNotes",
        catalog_number: i32 = "catalogNumber",
        material: String = "material",
        period: String = "period",
        conservation_status: String = "conservationStatus",
    }
    children {
        reference: Option<AssetReferenceRecord> = "reference",
        coordinates: Option<CoordinatesRecord> = "coordinates",
        defects: Vec<DefectRecord> = "defects",
    }
}

record! {
    pub struct CaveRecord("Cave") {
        name: String = "name",
        description: String = "description",
        label: String = "label",
        creation_period: String = "creationPeriod",
        last_inspection_date: i64 = "lastInspectionDate",
        inspection_notes: String = "inspectionNotes",
    }
    children {
        reference: Option<AssetReferenceRecord> = "reference",
        coordinates: Option<CoordinatesRecord> = "coordinates",
        environment_conditions: Vec<EnvironmentConditionRecord> = "environmentConditions",
        defects: Vec<DefectRecord> = "defects",
        exhibits: Vec<ExhibitRecord> = "exhibits",
    }
}

record! {
    pub struct MuralRecord("Mural") {
        name: String = "name",
        description: String = "description",
        label: String = "label",
        creation_period: String = "creationPeriod",
        last_inspection_date: i64 = "lastInspectionDate",
        inspection_notes: String = "inspectionNotes",
        catalog_number: i32 = "catalogNumber",
        material: String = "material",
        period: String = "period",
        conservation_status: String = "conservationStatus",
        width: f64 = "width",
        height: f64 = "height",
        technique: String = "technique",
    }
    children {
        reference: Option<AssetReferenceRecord> = "reference",
        coordinates: Option<CoordinatesRecord> = "coordinates",
        environment_conditions: Vec<EnvironmentConditionRecord> = "environmentConditions",
        defects: Vec<DefectRecord> = "defects",
    }
}

record! {
    pub struct StatueRecord("Statue") {
        name: String = "name",
        description: String = "description",
        label: String = "label",
        creation_period: String = "creationPeriod",
        last_inspection_date: i64 = "lastInspectionDate",
        inspection_notes: String = "inspectionNotes",
        catalog_number: i32 = "catalogNumber",
        material: String = "material",
        period: String = "period",
        conservation_status: String = "conservationStatus",
        height: f64 = "height",
        pose: String = "pose",
    }
    children {
        reference: Option<AssetReferenceRecord> = "reference",
        coordinates: Option<CoordinatesRecord> = "coordinates",
        environment_conditions: Vec<EnvironmentConditionRecord> = "environmentConditions",
        defects: Vec<DefectRecord> = "defects",
    }
}

record! {
    pub struct PaintingRecord("Painting") {
        name: String = "name",
        description: String = "description",
        label: String = "label",
        creation_period: String = "creationPeriod",
        last_inspection_date: i64 = "lastInspectionDate",
        inspection_notes: String = "inspectionNotes",
        catalog_number: i32 = "catalogNumber",
        material: String = "material",
        period: String = "period",
        conservation_status: String = "conservationStatus",
        width: f64 = "width",
        height: f64 = "height",
        medium: String = "medium",
    }
    children {
        reference: Option<AssetReferenceRecord> = "reference",
        coordinates: Option<CoordinatesRecord> = "coordinates",
        environment_conditions: Vec<EnvironmentConditionRecord> = "environmentConditions",
        defects: Vec<DefectRecord> = "defects",
    }
}

record! {
    pub struct InscriptionRecord("Inscription") {
        name: String = "name",
        description: String = "description",
        label: String = "label",
        creation_period: String = "creationPeriod",
        last_inspection_date: i64 = "lastInspectionDate",
        inspection_notes: String = "inspectionNotes",
        catalog_number: i32 = "catalogNumber",
        material: String = "material",
        period: String = "period",
        conservation_status: String = "conservationStatus",
        language: String = "language",
        content: String = "content",
    }
    children {
        reference: Option<AssetReferenceRecord> = "reference",
        coordinates: Option<CoordinatesRecord> = "coordinates",
        environment_conditions: Vec<EnvironmentConditionRecord> = "environmentConditions",
        defects: Vec<DefectRecord> = "defects",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DbError, Gid, Value};
    use crate::document::Document;
    use crate::mapper::to_record;
    use crate::schema::Schema;
    use std::sync::Arc;

    const SCHEMA: &str = include_str!("../../resources/schema/heritage.schema");

    fn catalog() -> (Document, Gid) {
        let schema = Arc::new(Schema::parse(SCHEMA).unwrap());
        let mut doc = Document::new(schema);
        let root = doc.root().clone();
        let cave = doc
            .create_child(&root, "caves", "Cave", Some(Gid::new("cave-16")))
            .unwrap();
        doc.set_attribute(&cave, "name", Value::from("Cave 16")).unwrap();
        doc.set_attribute(&cave, "label", Value::from("Library Cave"))
            .unwrap();
        doc.set_attribute(&cave, "lastInspectionDate", Value::Integer(1_700_000_000_000))
            .unwrap();
        let reference = doc
            .create_child(&cave, "reference", "AssetReference", None)
            .unwrap();
        doc.set_attribute(&reference, "modelLocation", Value::from("m.glb"))
            .unwrap();
        (doc, cave)
    }

    #[test]
    fn test_cave_record_copies_scalars_and_children() {
        let (mut doc, cave) = catalog();
        let statue = doc
            .create_child(&cave, "exhibits", "Statue", Some(Gid::new("statue-1")))
            .unwrap();
        doc.set_attribute(&statue, "name", Value::from("Seated Buddha"))
            .unwrap();
        doc.set_attribute(&statue, "conservationStatus", Value::from("stable"))
            .unwrap();
        let statue_defect = doc.create_child(&statue, "defects", "Defect", None).unwrap();
        doc.set_attribute(&statue_defect, "severity", Value::from("minor"))
            .unwrap();

        let record: CaveRecord = to_record(doc.node(&cave)).unwrap().unwrap();
        assert_eq!(record.gid, "cave-16");
        assert_eq!(record.name, "Cave 16");
        assert_eq!(record.label, "Library Cave");
        assert_eq!(record.description, "");
        assert_eq!(record.last_inspection_date, 1_700_000_000_000);
        assert_eq!(
            record.reference.as_ref().map(|r| r.model_location.as_str()),
            Some("m.glb")
        );
        assert!(record.coordinates.is_none());

        assert_eq!(record.exhibits.len(), 1);
        let exhibit = &record.exhibits[0];
        assert_eq!(exhibit.name, "Seated Buddha");
        assert_eq!(exhibit.conservation_status, "stable");
        // Nested one level only.
        assert!(exhibit.defects.is_empty());
    }

    #[test]
    fn test_numeric_fields_are_narrowed() {
        let (mut doc, cave) = catalog();
        let coords = doc
            .create_child(&cave, "coordinates", "Coordinates", None)
            .unwrap();
        doc.set_attribute(&coords, "x", Value::Float(1.5)).unwrap();
        let mural = doc.create_child(&cave, "exhibits", "Mural", None).unwrap();
        doc.set_attribute(&mural, "catalogNumber", Value::Integer(45)).unwrap();
        doc.set_attribute(&mural, "width", Value::Integer(3)).unwrap();

        let coordinates: CoordinatesRecord = to_record(doc.node(&coords)).unwrap().unwrap();
        assert_eq!(coordinates.x, 1.5_f32);
        assert_eq!(coordinates.y, 0.0);

        let mural: MuralRecord = to_record(doc.node(&mural)).unwrap().unwrap();
        assert_eq!(mural.catalog_number, 45);
        assert_eq!(mural.width, 3.0);
    }

    #[test]
    fn test_missing_node_maps_to_none() {
        let (doc, _) = catalog();
        let record: Option<CaveRecord> = to_record(doc.node(&Gid::new("nope"))).unwrap();
        assert!(record.is_none());
    }

    #[test]
    fn test_wrong_type_is_conversion_error() {
        let (doc, cave) = catalog();
        let err = to_record::<DefectRecord>(doc.node(&cave)).unwrap_err();
        match err {
            DbError::Conversion { record, .. } => assert_eq!(record, "DefectRecord"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_serializes_camel_case() {
        let (doc, cave) = catalog();
        let record: CaveRecord = to_record(doc.node(&cave)).unwrap().unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["lastInspectionDate"], 1_700_000_000_000_i64);
        assert_eq!(json["reference"]["modelLocation"], "m.glb");
        assert!(json["environmentConditions"].as_array().unwrap().is_empty());
    }
}
