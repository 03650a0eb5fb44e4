use clap::{Parser, Subcommand};
use fcb_core::error::Error;
use fcb_core::{
    read_cityjson_seq, AttrQuery, AttributeSchema, ByteSerializableValue, CityJsonSeq, ColumnType,
    FcbReader, FcbWriter, Header, HeaderWriterOptions, Operator, OrderedFloat, SpatialQuery,
};
use stream::drain_to_writer;
use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::PathBuf,
};

#[derive(Parser)]
#[command(author, version, about = "CLI tool for CityJSONSeq <-> FCB conversion and queries")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert CityJSONSeq to FCB
    Ser {
        /// Input file (use '-' for stdin)
        #[arg(short, long)]
        input: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Comma-separated list of attributes to create indexes for
        #[arg(long)]
        attr_index: Option<String>,
    },

    /// Convert FCB back to CityJSONSeq
    Deser {
        /// Input file (use '-' for stdin)
        #[arg(short, long)]
        input: String,

        /// Output file (use '-' for stdout)
        #[arg(short, long)]
        output: String,
    },

    /// Show info about an FCB file
    Info {
        /// Input FCB file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Query an FCB file, emitting matching features as CityJSONSeq
    Query {
        /// Input FCB file
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (use '-' for stdout)
        #[arg(short, long, default_value = "-")]
        output: String,

        /// Bounding box filter: minx,miny,maxx,maxy
        #[arg(long, value_delimiter = ',', num_args = 4, conflicts_with_all = ["nearest", "attr"])]
        bbox: Option<Vec<f64>>,

        /// Nearest-feature filter: x,y
        #[arg(long, value_delimiter = ',', num_args = 2, conflicts_with = "attr")]
        nearest: Option<Vec<f64>>,

        /// Attribute conditions like "height > 40" (repeatable, ANDed)
        #[arg(long)]
        attr: Vec<String>,
    },
}

// The reader's streaming iterator has the same drain shape everywhere; keep
// it in one place instead of three copies below.
mod stream {
    use super::*;
    use fcb_core::reader_trait::Seekable;
    use fcb_core::FeatureIter;

    pub fn drain_to_writer<R: Read + io::Seek, W: Write>(
        mut iter: FeatureIter<R, Seekable>,
        mut out: W,
    ) -> Result<u64, Error> {
        use fallible_streaming_iterator::FallibleStreamingIterator;
        let mut written = 0u64;
        while let Some(feature) = iter.next()? {
            writeln!(out, "{}", serde_json::to_string(feature)?)?;
            written += 1;
        }
        if iter.malformed_count() > 0 {
            eprintln!("skipped {} malformed feature record(s)", iter.malformed_count());
        }
        Ok(written)
    }
}

fn get_reader(input: &str) -> Result<Box<dyn Read>, Error> {
    match input {
        "-" => Ok(Box::new(io::stdin())),
        path => Ok(Box::new(File::open(path)?)),
    }
}

fn get_writer(output: &str) -> Result<Box<dyn Write>, Error> {
    match output {
        "-" => Ok(Box::new(io::stdout())),
        path => Ok(Box::new(File::create(path)?)),
    }
}

fn serialize(input: &str, output: &PathBuf, attr_index: Option<String>) -> Result<(), Error> {
    let reader = BufReader::new(get_reader(input)?);
    let writer = BufWriter::new(File::create(output)?);

    let CityJsonSeq { cj, features } = read_cityjson_seq(reader)?;

    let attr_schema = {
        let mut schema = AttributeSchema::new();
        for feature in features.iter() {
            for object in feature.city_objects.values() {
                if let Some(attributes) = &object.attributes {
                    schema.add_attributes(attributes);
                }
            }
        }
        (!schema.is_empty()).then_some(schema)
    };

    let attr_index_vec = attr_index.map(|s| {
        s.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
    });

    let header_options = HeaderWriterOptions {
        attribute_indices: attr_index_vec,
        ..Default::default()
    };

    let mut fcb = FcbWriter::new(cj, Some(header_options), attr_schema)?;
    for feature in features.iter() {
        fcb.add_feature(feature)?;
    }
    fcb.write(writer)?;

    eprintln!("Successfully encoded to FCB");
    Ok(())
}

fn deserialize(input: &str, output: &str) -> Result<(), Error> {
    let mut writer = BufWriter::new(get_writer(output)?);

    // stdin is not seekable, files are; both stream all features
    if input == "-" {
        use fallible_streaming_iterator::FallibleStreamingIterator;
        let reader = FcbReader::open(BufReader::new(io::stdin()))?;
        writeln!(writer, "{}", serde_json::to_string(reader.cityjson())?)?;
        let mut iter = reader.select_all_seq()?;
        while let Some(feature) = iter.next()? {
            writeln!(writer, "{}", serde_json::to_string(feature)?)?;
        }
    } else {
        let reader = FcbReader::open(BufReader::new(File::open(input)?))?;
        writeln!(writer, "{}", serde_json::to_string(reader.cityjson())?)?;
        drain_to_writer(reader.select_all()?, &mut writer)?;
    }
    Ok(())
}

fn show_info(input: PathBuf) -> Result<(), Error> {
    let file_size = std::fs::metadata(&input)?.len();
    let reader = FcbReader::open(BufReader::new(File::open(input)?))?;
    let header = reader.header();

    println!("FCB file info:");
    println!("  File size: {} bytes", file_size);
    println!("  Features count: {}", header.features_count);
    let e = &header.geographical_extent;
    println!("  Geographical extent:");
    println!("    Min: [{}, {}, {}]", e[0], e[1], e[2]);
    println!("    Max: [{}, {}, {}]", e[3], e[4], e[5]);
    if let Some(title) = header
        .metadata
        .metadata
        .as_ref()
        .and_then(|m| m.title.as_ref())
    {
        println!("  Title: {}", title);
    }
    println!("  Columns:");
    for column in &header.columns {
        println!(
            "    {} ({}){}",
            column.name,
            column.type_.name(),
            if column.attr_index { " [indexed]" } else { "" }
        );
    }
    Ok(())
}

/// Parse "name OP value" with OP one of >=, <=, >, <, =; the value is coerced
/// to the column's declared type.
fn parse_condition(header: &Header, raw: &str) -> Result<(String, Operator, ByteSerializableValue), Error> {
    let (op_token, operator) = ["<=", ">=", "<", ">", "="]
        .iter()
        .find_map(|token| {
            raw.contains(token).then(|| {
                let operator = match *token {
                    ">" => Operator::Gt,
                    ">=" => Operator::Ge,
                    "=" => Operator::Eq,
                    "<" => Operator::Lt,
                    "<=" => Operator::Le,
                    _ => unreachable!(),
                };
                (*token, operator)
            })
        })
        .ok_or_else(|| Error::Parse(format!("no operator in condition {raw:?}")))?;

    let (name, value) = raw.split_once(op_token).expect("operator found above");
    let name = name.trim().to_string();
    let value = value.trim();

    let column = header
        .column(&name)
        .ok_or_else(|| Error::UnindexedColumn(name.clone()))?;
    let parse = |what: &str| Error::Parse(format!("cannot parse {value:?} as {what}"));
    let value = match column.type_ {
        ColumnType::Int => ByteSerializableValue::I32(value.parse().map_err(|_| parse("Int"))?),
        ColumnType::UInt => ByteSerializableValue::U32(value.parse().map_err(|_| parse("UInt"))?),
        ColumnType::Long => ByteSerializableValue::I64(value.parse().map_err(|_| parse("Long"))?),
        ColumnType::ULong => ByteSerializableValue::U64(value.parse().map_err(|_| parse("ULong"))?),
        ColumnType::Float => {
            ByteSerializableValue::F32(OrderedFloat(value.parse().map_err(|_| parse("Float"))?))
        }
        ColumnType::Double => {
            ByteSerializableValue::F64(OrderedFloat(value.parse().map_err(|_| parse("Double"))?))
        }
        ColumnType::Bool => ByteSerializableValue::Bool(value.parse().map_err(|_| parse("Bool"))?),
        ColumnType::String | ColumnType::DateTime => {
            ByteSerializableValue::String(value.trim_matches('"').to_string())
        }
        ColumnType::Json => {
            return Err(Error::UnsupportedColumnType(column.type_.name().to_string()))
        }
    };
    Ok((name, operator, value))
}

fn query(
    input: PathBuf,
    output: &str,
    bbox: Option<Vec<f64>>,
    nearest: Option<Vec<f64>>,
    attr: Vec<String>,
) -> Result<(), Error> {
    let mut writer = BufWriter::new(get_writer(output)?);
    let reader = FcbReader::open(BufReader::new(File::open(input)?))?;
    writeln!(writer, "{}", serde_json::to_string(reader.cityjson())?)?;

    let iter = if let Some(bbox) = bbox {
        reader.select_spatial(SpatialQuery::bbox(bbox[0], bbox[1], bbox[2], bbox[3]))?
    } else if let Some(point) = nearest {
        reader.select_spatial(SpatialQuery::point_nearest(point[0], point[1]))?
    } else if !attr.is_empty() {
        let conditions: AttrQuery = attr
            .iter()
            .map(|raw| parse_condition(reader.header(), raw))
            .collect::<Result<_, _>>()?;
        reader.select_attr_query(&conditions)?
    } else {
        reader.select_all()?
    };

    let written = drain_to_writer(iter, &mut writer)?;
    eprintln!("{} feature(s) matched", written);
    Ok(())
}

fn main() -> Result<(), Error> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Ser {
            input,
            output,
            attr_index,
        } => serialize(&input, &output, attr_index),
        Commands::Deser { input, output } => deserialize(&input, &output),
        Commands::Info { input } => show_info(input),
        Commands::Query {
            input,
            output,
            bbox,
            nearest,
            attr,
        } => query(input, &output, bbox, nearest, attr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
