// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Typed access to a node's `Props` param.

use libspa::pod::deserialize::PodDeserializer;
use libspa::pod::serialize::PodSerializer;
use libspa::pod::{Object, Property, PropertyFlags, Value, ValueArray};
use std::io::Cursor;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed pod: {0}")]
    Malformed(String),
    #[error("Props param is not an object")]
    NotAnObject,
    #[error("Props param has no channel volumes")]
    NoChannelVolumes,
    #[error("Channel volumes are not a float array")]
    InvalidChannelVolumes,
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Failed to serialize pod: {0}")]
    SerializationFailed(String),
}

/// The parts of a node's `Props` we care about.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeProps {
    pub channel_volumes: Vec<f32>,
    pub mute: Option<bool>,
}

impl NodeProps {
    /// Decode a serialized `Props` object.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (_, value) = PodDeserializer::deserialize_any_from(bytes)
            .map_err(|e| DecodeError::Malformed(format!("{:?}", e)))?;

        let Value::Object(object) = value else {
            return Err(DecodeError::NotAnObject);
        };

        let mut channel_volumes = None;
        let mut mute = None;
        for property in object.properties {
            match property.key {
                libspa::sys::SPA_PROP_channelVolumes => match property.value {
                    Value::ValueArray(ValueArray::Float(volumes)) => {
                        channel_volumes = Some(volumes);
                    }
                    _ => return Err(DecodeError::InvalidChannelVolumes),
                },
                libspa::sys::SPA_PROP_mute => {
                    if let Value::Bool(muted) = property.value {
                        mute = Some(muted);
                    }
                }
                _ => {}
            }
        }

        let channel_volumes = channel_volumes.ok_or(DecodeError::NoChannelVolumes)?;
        trace!("Decoded props: volumes={:?} mute={:?}", channel_volumes, mute);
        Ok(Self {
            channel_volumes,
            mute,
        })
    }
}

/// Build a `Props` pod setting every channel volume.
pub fn build_channel_volumes_pod(volumes: &[f32]) -> Result<Vec<u8>, ControlError> {
    let props = Value::Object(Object {
        type_: libspa::sys::SPA_TYPE_OBJECT_Props,
        id: libspa::sys::SPA_PARAM_Props,
        properties: vec![Property {
            key: libspa::sys::SPA_PROP_channelVolumes,
            flags: PropertyFlags::empty(),
            value: Value::ValueArray(ValueArray::Float(volumes.to_vec())),
        }],
    });

    let mut buffer = Vec::new();
    PodSerializer::serialize(Cursor::new(&mut buffer), &props)
        .map_err(|e| ControlError::SerializationFailed(format!("{:?}", e)))?;

    Ok(buffer)
}
