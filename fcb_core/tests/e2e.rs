use anyhow::Result;
use fallible_streaming_iterator::FallibleStreamingIterator;
use fcb_core::{
    read_cityjson_seq, AttributeSchema, FcbReader, FcbWriter, HeaderWriterOptions,
};
use pretty_assertions::assert_eq;
use std::io::{BufReader, Cursor};

/// CityJSONSeq text -> FCB -> CityJSONSeq, comparing decoded features.
#[test]
fn cityjsonseq_roundtrip() -> Result<()> {
    let seq_text = concat!(
        r#"{"type":"CityJSON","version":"2.0","transform":{"scale":[0.001,0.001,0.001],"translate":[85000.0,446000.0,0.0]},"metadata":{"geographicalExtent":[85000.0,446000.0,0.0,85002.0,446002.0,3.0],"referenceSystem":"https://www.opengis.net/def/crs/EPSG/0/7415","title":"delft sample"}}"#,
        "\n",
        r#"{"type":"CityJSONFeature","id":"NL.IMBAG.Pand.1","CityObjects":{"NL.IMBAG.Pand.1":{"type":"Building","attributes":{"b3_h_dak_50p":7.5,"identificatie":"NL.IMBAG.Pand.1"},"geometry":[{"type":"Solid","lod":"1.2","boundaries":[[[[0,1,2,3]],[[4,5,6,7]],[[0,4,7,3]]]],"semantics":{"surfaces":[{"type":"GroundSurface"},{"type":"RoofSurface"},{"type":"WallSurface"}],"values":[[0,1,2]]}}]}},"vertices":[[0,0,0],[2000,0,0],[2000,2000,0],[0,2000,0],[0,0,3000],[2000,0,3000],[2000,2000,3000],[0,2000,3000]]}"#,
        "\n",
        r#"{"type":"CityJSONFeature","id":"NL.IMBAG.Pand.2","CityObjects":{"NL.IMBAG.Pand.2":{"type":"Building","attributes":{"b3_h_dak_50p":11.0,"identificatie":"NL.IMBAG.Pand.2"},"geometry":[{"type":"MultiSurface","lod":"1.2","boundaries":[[[0,1,2,3]]]}]}},"vertices":[[500,500,0],[1500,500,0],[1500,1500,0],[500,1500,0]]}"#,
        "\n",
    );

    let seq = read_cityjson_seq(BufReader::new(seq_text.as_bytes()))?;
    assert_eq!(seq.features.len(), 2);

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
            attribute_indices: Some(vec!["b3_h_dak_50p".to_string()]),
            ..Default::default()
        }),
        Some(schema),
    )?;
    for feature in &seq.features {
        writer.add_feature(feature)?;
    }
    let mut buf = Vec::new();
    writer.write(&mut buf)?;

    let reader = FcbReader::open(Cursor::new(&buf))?;
    assert_eq!(
        reader.cityjson().transform.translate,
        [85000.0, 446000.0, 0.0]
    );
    assert_eq!(
        reader
            .cityjson()
            .metadata
            .as_ref()
            .and_then(|m| m.reference_system.as_deref()),
        Some("https://www.opengis.net/def/crs/EPSG/0/7415")
    );

    let mut decoded = Vec::new();
    let mut iter = reader.select_all()?;
    while let Some(feature) = iter.next()? {
        decoded.push(feature.clone());
    }
    decoded.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(decoded, seq.features);
    Ok(())
}

/// The header's declared extent covers all features after quantization.
#[test]
fn header_extent_covers_features() -> Result<()> {
    let seq_text = concat!(
        r#"{"type":"CityJSON","version":"2.0","transform":{"scale":[0.01,0.01,0.01],"translate":[10.0,20.0,0.0]}}"#,
        "\n",
        r#"{"type":"CityJSONFeature","id":"a","CityObjects":{"a":{"type":"Building","geometry":[{"type":"MultiPoint","boundaries":[0,1]}]}},"vertices":[[0,0,0],[100,100,500]]}"#,
        "\n",
        r#"{"type":"CityJSONFeature","id":"b","CityObjects":{"b":{"type":"Building","geometry":[{"type":"MultiPoint","boundaries":[0,1]}]}},"vertices":[[200,200,0],[300,300,100]]}"#,
        "\n",
    );
    let seq = read_cityjson_seq(BufReader::new(seq_text.as_bytes()))?;

    let mut writer = FcbWriter::new(seq.cj.clone(), None, None)?;
    for feature in &seq.features {
        writer.add_feature(feature)?;
    }
    let mut buf = Vec::new();
    writer.write(&mut buf)?;

    let reader = FcbReader::open(Cursor::new(&buf))?;
    let extent = reader.header().geographical_extent;
    // x: 10.0 .. 10.0 + 300*0.01, y: 20.0 .. 20.0 + 300*0.01, z: 0 .. 5.0
    assert_eq!(extent, [10.0, 20.0, 0.0, 13.0, 23.0, 5.0]);
    Ok(())
}
