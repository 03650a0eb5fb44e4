use anyhow::Result;
use fallible_streaming_iterator::FallibleStreamingIterator;
use fcb_core::{
    AttributeSchema, Boundaries, CityJson, CityJsonFeature, CityJsonSeq, CityObject, FcbReader,
    FcbWriter, Geometry, GeometryType, HeaderWriterOptions, Metadata, SpatialQuery,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::io::Cursor;

fn test_feature(id: &str, min: i64, max: i64, height: f64, ident: &str) -> CityJsonFeature {
    let mut feature = CityJsonFeature::new(id.to_string());
    feature.vertices = vec![[min, min, 0], [max, max, 2]];
    feature.city_objects.insert(
        format!("{id}-building"),
        CityObject {
            thetype: "Building".to_string(),
            attributes: Some(json!({ "height": height, "identificatie": ident })),
            geometry: Some(vec![Geometry {
                thetype: GeometryType::MultiPoint,
                lod: Some("1".to_string()),
                boundaries: Boundaries::Indices(vec![0, 1]),
                semantics: None,
            }]),
            ..Default::default()
        },
    );
    feature
}

fn example_seq() -> CityJsonSeq {
    let mut cj = CityJson::new();
    cj.metadata = Some(Metadata {
        title: Some("example".to_string()),
        ..Default::default()
    });
    CityJsonSeq {
        cj,
        features: vec![
            test_feature("f1", 0, 1, 10.0, "NL.1"),
            test_feature("f2", 5, 6, 50.0, "NL.2"),
            test_feature("f3", 10, 11, 45.0, "NL.3"),
        ],
    }
}

fn write_container(seq: &CityJsonSeq, attr_indices: &[&str]) -> Result<Vec<u8>> {
    let mut schema = AttributeSchema::new();
    for feature in &seq.features {
        for object in feature.city_objects.values() {
            if let Some(attributes) = &object.attributes {
                schema.add_attributes(attributes);
            }
        }
    }
    let mut writer = FcbWriter::new(
        seq.cj.clone(),
        Some(HeaderWriterOptions {
            attribute_indices: Some(attr_indices.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }),
        Some(schema),
    )?;
    for feature in &seq.features {
        writer.add_feature(feature)?;
    }
    let mut buf = Vec::new();
    writer.write(&mut buf)?;
    Ok(buf)
}

#[test]
fn roundtrip_all_features() -> Result<()> {
    let seq = example_seq();
    let buf = write_container(&seq, &["height"])?;

    let reader = FcbReader::open(Cursor::new(&buf))?;
    assert_eq!(reader.header().features_count, 3);
    assert_eq!(
        reader.cityjson().metadata.as_ref().unwrap().title.as_deref(),
        Some("example")
    );

    let mut iter = reader.select_all()?;
    let mut features = Vec::new();
    while let Some(feature) = iter.next()? {
        features.push(feature.clone());
    }
    assert_eq!(iter.malformed_count(), 0);

    // the container stores features in Hilbert order; compare as sets by id
    features.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(features, seq.features);
    Ok(())
}

#[test]
fn header_sections_tile_the_file() -> Result<()> {
    let seq = example_seq();
    let buf = write_container(&seq, &["height"])?;

    let header_size = u32::from_le_bytes(buf[8..12].try_into().unwrap()) as usize;
    let reader = FcbReader::open(Cursor::new(&buf))?;
    let header = reader.header();

    let feature_begin = 12 + header_size + header.rtree_index_size() + header.attr_index_size();
    assert!(feature_begin < buf.len());

    // walking size prefixes from feature_begin lands exactly on EOF after
    // features_count records
    let mut pos = feature_begin;
    let mut count = 0u64;
    while pos < buf.len() {
        let size = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4 + size;
        count += 1;
    }
    assert_eq!(pos, buf.len());
    assert_eq!(count, header.features_count);
    Ok(())
}

#[test]
fn select_bbox_example_scenario() -> Result<()> {
    let seq = example_seq();
    let buf = write_container(&seq, &["height"])?;

    let mut iter = FcbReader::open(Cursor::new(&buf))?.select_bbox(-1.0, -1.0, 2.0, 2.0)?;
    let mut ids = Vec::new();
    while let Some(feature) = iter.next()? {
        ids.push(feature.id.clone());
    }
    assert_eq!(ids, vec!["f1".to_string()]);
    Ok(())
}

#[test]
fn select_nearest_example_scenario() -> Result<()> {
    let seq = example_seq();
    let buf = write_container(&seq, &["height"])?;

    let mut iter = FcbReader::open(Cursor::new(&buf))?
        .select_spatial(SpatialQuery::point_nearest(5.5, 5.5))?;
    let mut ids = Vec::new();
    while let Some(feature) = iter.next()? {
        ids.push(feature.id.clone());
    }
    assert_eq!(ids, vec!["f2".to_string()]);
    Ok(())
}

#[test]
fn point_intersects_is_bbox_containment() -> Result<()> {
    let seq = example_seq();
    let buf = write_container(&seq, &["height"])?;

    let mut iter = FcbReader::open(Cursor::new(&buf))?
        .select_spatial(SpatialQuery::point_intersects(10.5, 10.5))?;
    let mut ids = Vec::new();
    while let Some(feature) = iter.next()? {
        ids.push(feature.id.clone());
    }
    assert_eq!(ids, vec!["f3".to_string()]);
    Ok(())
}

#[test]
fn exhausted_iterator_is_idempotent() -> Result<()> {
    let seq = example_seq();
    let buf = write_container(&seq, &["height"])?;

    let mut iter = FcbReader::open(Cursor::new(&buf))?.select_all()?;
    while iter.next()?.is_some() {}
    assert!(iter.next()?.is_none());
    assert!(iter.next()?.is_none());
    Ok(())
}

/// Two fresh queries paginated as 2 + 2 yield the same features in the same
/// order as one query reading 4.
#[test]
fn pagination_is_consistent_across_fresh_queries() -> Result<()> {
    let mut seq = example_seq();
    seq.features.push(test_feature("f4", 20, 21, 30.0, "NL.4"));
    seq.features.push(test_feature("f5", 30, 31, 20.0, "NL.5"));
    let buf = write_container(&seq, &["height"])?;

    let collect_page = |offset: usize, limit: usize| -> Result<Vec<String>> {
        let mut iter = FcbReader::open(Cursor::new(&buf))?.select_all()?;
        let mut skipped = 0;
        while skipped < offset && iter.next()?.is_some() {
            skipped += 1;
        }
        let mut ids = Vec::new();
        while ids.len() < limit {
            match iter.next()? {
                Some(feature) => ids.push(feature.id.clone()),
                None => break,
            }
        }
        Ok(ids)
    };

    let first = collect_page(0, 2)?;
    let second = collect_page(2, 2)?;
    let combined: Vec<String> = first.into_iter().chain(second).collect();
    assert_eq!(combined, collect_page(0, 4)?);
    Ok(())
}

#[test]
fn truncated_file_is_rejected() {
    let seq = example_seq();
    let buf = write_container(&seq, &["height"]).unwrap();
    let result = FcbReader::open(Cursor::new(&buf[..40]));
    assert!(result.is_err());
}
