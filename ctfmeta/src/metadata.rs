use crate::error::MetadataError;
use crate::types::{ArrayType, StructType, TypeNode};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The trace-level packet header, decoded once at the start of a stream. Its
/// `stream_id` field (if any) selects the `StreamDefinition` that applies.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct TraceDefinition {
    pub packet_header: StructType,
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct EventDefinition {
    pub id: u64,
    pub name: Arc<str>,
    pub fields: StructType,
    pub is_fixed_size: bool,
    pub fixed_size_bits: u64,
}

impl EventDefinition {
    pub fn new(id: u64, name: &str, fields: StructType) -> EventDefinition {
        let fixed_size_bits = fields.fixed_size_bits();

        EventDefinition {
            id,
            name: Arc::from(name),
            fields,
            is_fixed_size: fixed_size_bits.is_some(),
            fixed_size_bits: fixed_size_bits.unwrap_or(0),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct StreamDefinition {
    pub id: u64,
    pub event_header: StructType,
    pub packet_context: StructType,
    events: FxHashMap<u64, EventDefinition>,
}

impl StreamDefinition {
    pub fn new(
        id: u64,
        event_header: StructType,
        packet_context: StructType,
        events: impl IntoIterator<Item = EventDefinition>,
    ) -> Result<StreamDefinition, MetadataError> {
        let mut table = FxHashMap::default();

        for event in events {
            let event_id = event.id;
            if table.insert(event_id, event).is_some() {
                return Err(MetadataError::DuplicateEvent {
                    stream_id: id,
                    id: event_id,
                });
            }
        }

        let stream = StreamDefinition {
            id,
            event_header,
            packet_context,
            events: table,
        };

        validate_struct(&stream.event_header, "event header")?;
        validate_struct(&stream.packet_context, "packet context")?;
        for event in stream.events.values() {
            validate_struct(&event.fields, &format!("event `{}`", event.name))?;
        }

        Ok(stream)
    }

    pub fn event(&self, id: u64) -> Option<&EventDefinition> {
        self.events.get(&id)
    }

    pub fn events(&self) -> impl Iterator<Item = &EventDefinition> + '_ {
        self.events.values()
    }

    pub fn num_events(&self) -> usize {
        self.events.len()
    }
}

/// The complete, immutable type model of a trace.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Metadata {
    trace: TraceDefinition,
    streams: FxHashMap<u64, StreamDefinition>,
}

impl Metadata {
    pub fn new(
        trace: TraceDefinition,
        streams: impl IntoIterator<Item = StreamDefinition>,
    ) -> Result<Metadata, MetadataError> {
        validate_struct(&trace.packet_header, "trace packet header")?;

        let mut table = FxHashMap::default();
        for stream in streams {
            let id = stream.id;
            if table.insert(id, stream).is_some() {
                return Err(MetadataError::DuplicateStream { id });
            }
        }

        if table.is_empty() {
            return Err(MetadataError::NoStreams);
        }

        Ok(Metadata {
            trace,
            streams: table,
        })
    }

    /// Loads a type model from its JSON snapshot. The snapshot is a direct
    /// serialization of the model, not CTF's TSDL.
    pub fn from_json(json: &str) -> Result<Metadata, MetadataError> {
        let snapshot: MetadataSnapshot = serde_json::from_str(json)?;
        snapshot.into_metadata()
    }

    pub fn trace(&self) -> &TraceDefinition {
        &self.trace
    }

    pub fn stream(&self, id: u64) -> Option<&StreamDefinition> {
        self.streams.get(&id)
    }

    pub fn streams(&self) -> impl Iterator<Item = &StreamDefinition> + '_ {
        self.streams.values()
    }
}

#[derive(Deserialize)]
struct MetadataSnapshot {
    trace: TraceDefinition,
    streams: Vec<StreamSnapshot>,
}

#[derive(Deserialize)]
struct StreamSnapshot {
    #[serde(default)]
    id: u64,
    event_header: StructType,
    packet_context: StructType,
    #[serde(default)]
    events: Vec<EventSnapshot>,
}

#[derive(Deserialize)]
struct EventSnapshot {
    id: u64,
    name: String,
    fields: StructType,
}

impl MetadataSnapshot {
    fn into_metadata(self) -> Result<Metadata, MetadataError> {
        let mut streams = Vec::with_capacity(self.streams.len());

        for stream in self.streams {
            let events = stream
                .events
                .into_iter()
                .map(|e| EventDefinition::new(e.id, &e.name, e.fields));

            streams.push(StreamDefinition::new(
                stream.id,
                stream.event_header,
                stream.packet_context,
                events,
            )?);
        }

        Metadata::new(self.trace, streams)
    }
}

fn validate_struct(strct: &StructType, context: &str) -> Result<(), MetadataError> {
    check_align(strct.min_align_bits, context)?;

    let mut seen = FxHashSet::default();
    for field in &strct.fields {
        if !seen.insert(&field.name) {
            return Err(MetadataError::DuplicateField {
                context: context.to_string(),
                name: field.name.to_string(),
            });
        }
        validate_type(&field.ty, &format!("{}.{}", context, field.name))?;
    }

    Ok(())
}

fn validate_type(ty: &TypeNode, context: &str) -> Result<(), MetadataError> {
    match ty {
        TypeNode::Integer(int) => check_align(int.align_bits, context),
        TypeNode::Float(float) => check_align(float.align_bits, context),
        TypeNode::Enum(en) => check_align(en.underlying.align_bits, context),
        TypeNode::String(_) => Ok(()),
        TypeNode::Struct(strct) => validate_struct(strct, context),
        TypeNode::Array(ArrayType { element, .. }) => validate_type(element, context),
        TypeNode::Variant(variant) => {
            let mut seen = FxHashSet::default();
            for member in &variant.members {
                if !seen.insert(&member.name) {
                    return Err(MetadataError::DuplicateField {
                        context: context.to_string(),
                        name: member.name.to_string(),
                    });
                }
                validate_type(&member.ty, &format!("{}.{}", context, member.name))?;
            }
            Ok(())
        }
    }
}

fn check_align(align_bits: u32, context: &str) -> Result<(), MetadataError> {
    if align_bits.is_power_of_two() {
        Ok(())
    } else {
        Err(MetadataError::InvalidAlignment {
            context: context.to_string(),
            align_bits,
        })
    }
}
