use anyhow::Result;
use fallible_streaming_iterator::FallibleStreamingIterator;
use fcb_core::{
    AttrQuery, AttributeSchema, Boundaries, ByteSerializableValue, CityJson, CityJsonFeature,
    CityObject, Error, FcbReader, FcbWriter, Geometry, GeometryType, HeaderWriterOptions,
    Operator, OrderedFloat,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::io::Cursor;

fn building(id: &str, base: i64, height: f64, ident: &str, year: i64) -> CityJsonFeature {
    let mut feature = CityJsonFeature::new(id.to_string());
    feature.vertices = vec![[base, base, 0], [base + 1, base + 1, 0]];
    feature.city_objects.insert(
        format!("{id}-building"),
        CityObject {
            thetype: "Building".to_string(),
            attributes: Some(json!({
                "b3_h_dak_50p": height,
                "identificatie": ident,
                "oorspronkelijkbouwjaar": year,
            })),
            geometry: Some(vec![Geometry {
                thetype: GeometryType::MultiPoint,
                lod: None,
                boundaries: Boundaries::Indices(vec![0, 1]),
                semantics: None,
            }]),
            ..Default::default()
        },
    );
    feature
}

fn container() -> Result<Vec<u8>> {
    let features = vec![
        building("b1", 0, 2.3, "NL.IMBAG.Pand.0503100000012869", 1920),
        building("b2", 10, 5.7, "NL.IMBAG.Pand.0503100000012870", 1920),
        building("b3", 20, 9.9, "NL.IMBAG.Pand.0503100000012871", 2001),
        building("b4", 30, 2.3, "NL.IMBAG.Pand.0503100000012872", 1987),
    ];
    let mut schema = AttributeSchema::new();
    for feature in &features {
        for object in feature.city_objects.values() {
            if let Some(attributes) = &object.attributes {
                schema.add_attributes(attributes);
            }
        }
    }
    let mut writer = FcbWriter::new(
        CityJson::new(),
        Some(HeaderWriterOptions {
            attribute_indices: Some(vec![
                "b3_h_dak_50p".to_string(),
                "identificatie".to_string(),
                "oorspronkelijkbouwjaar".to_string(),
            ]),
            ..Default::default()
        }),
        Some(schema),
    )?;
    for feature in &features {
        writer.add_feature(feature)?;
    }
    let mut buf = Vec::new();
    writer.write(&mut buf)?;
    Ok(buf)
}

fn run_query(buf: &[u8], query: AttrQuery) -> Result<Vec<String>> {
    let mut iter = FcbReader::open(Cursor::new(buf))?.select_attr_query(&query)?;
    let mut ids = Vec::new();
    while let Some(feature) = iter.next()? {
        ids.push(feature.id.clone());
    }
    ids.sort();
    Ok(ids)
}

#[test]
fn gt_and_eq_combined() -> Result<()> {
    let buf = container()?;
    let query: AttrQuery = vec![
        (
            "b3_h_dak_50p".to_string(),
            Operator::Gt,
            ByteSerializableValue::F64(OrderedFloat(2.0)),
        ),
        (
            "identificatie".to_string(),
            Operator::Eq,
            ByteSerializableValue::String("NL.IMBAG.Pand.0503100000012869".to_string()),
        ),
    ];
    assert_eq!(run_query(&buf, query)?, vec!["b1".to_string()]);
    Ok(())
}

#[test]
fn eq_returns_all_duplicates() -> Result<()> {
    let buf = container()?;
    let query: AttrQuery = vec![(
        "oorspronkelijkbouwjaar".to_string(),
        Operator::Eq,
        ByteSerializableValue::I64(1920),
    )];
    assert_eq!(
        run_query(&buf, query)?,
        vec!["b1".to_string(), "b2".to_string()]
    );
    Ok(())
}

/// `Lt v` and `Ge v` partition the indexed features: together they cover
/// everything, separately they share nothing.
#[test]
fn lt_and_ge_partition() -> Result<()> {
    let buf = container()?;
    let boundary = 5.7;
    let below = run_query(
        &buf,
        vec![(
            "b3_h_dak_50p".to_string(),
            Operator::Lt,
            ByteSerializableValue::F64(OrderedFloat(boundary)),
        )],
    )?;
    let above = run_query(
        &buf,
        vec![(
            "b3_h_dak_50p".to_string(),
            Operator::Ge,
            ByteSerializableValue::F64(OrderedFloat(boundary)),
        )],
    )?;
    assert_eq!(below, vec!["b1".to_string(), "b4".to_string()]);
    assert_eq!(above, vec!["b2".to_string(), "b3".to_string()]);
    assert!(below.iter().all(|id| !above.contains(id)));
    Ok(())
}

#[test]
fn strictly_greater_excludes_boundary() -> Result<()> {
    let buf = container()?;
    let query: AttrQuery = vec![(
        "b3_h_dak_50p".to_string(),
        Operator::Gt,
        ByteSerializableValue::F64(OrderedFloat(2.3)),
    )];
    assert_eq!(
        run_query(&buf, query)?,
        vec!["b2".to_string(), "b3".to_string()]
    );
    Ok(())
}

#[test]
fn le_includes_boundary() -> Result<()> {
    let buf = container()?;
    let query: AttrQuery = vec![(
        "b3_h_dak_50p".to_string(),
        Operator::Le,
        ByteSerializableValue::F64(OrderedFloat(2.3)),
    )];
    assert_eq!(
        run_query(&buf, query)?,
        vec!["b1".to_string(), "b4".to_string()]
    );
    Ok(())
}

#[test]
fn unindexed_column_fails_before_io() -> Result<()> {
    let features = vec![building("b1", 0, 2.3, "NL.1", 1920)];
    let mut schema = AttributeSchema::new();
    for object in features[0].city_objects.values() {
        schema.add_attributes(object.attributes.as_ref().unwrap());
    }
    // only the height column is indexed
    let mut writer = FcbWriter::new(
        CityJson::new(),
        Some(HeaderWriterOptions {
            attribute_indices: Some(vec!["b3_h_dak_50p".to_string()]),
            ..Default::default()
        }),
        Some(schema),
    )?;
    writer.add_feature(&features[0])?;
    let mut buf = Vec::new();
    writer.write(&mut buf)?;

    let query: AttrQuery = vec![(
        "identificatie".to_string(),
        Operator::Eq,
        ByteSerializableValue::String("NL.1".to_string()),
    )];
    let err = FcbReader::open(Cursor::new(&buf))?
        .select_attr_query(&query)
        .unwrap_err();
    assert!(matches!(err, Error::UnindexedColumn(name) if name == "identificatie"));
    Ok(())
}

#[test]
fn mismatched_value_type_is_rejected() -> Result<()> {
    let buf = container()?;
    let query: AttrQuery = vec![(
        "b3_h_dak_50p".to_string(),
        Operator::Gt,
        ByteSerializableValue::I64(2),
    )];
    let err = FcbReader::open(Cursor::new(&buf))?
        .select_attr_query(&query)
        .unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));
    assert!(err.is_validation_error());
    Ok(())
}
