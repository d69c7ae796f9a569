use serde_json_bytes::ByteString;

use super::ArgsBuilder;
use super::ArgumentValue;
use super::KeyExtractor;
use super::SelectionSet;
use crate::json_ext::Object;
use crate::json_ext::ObjectExt;
use crate::json_ext::Value;

impl ArgsBuilder {
    /// Builds the arguments of a singular call for one entity.
    ///
    /// Returns the name of the first field an argument needs but the entity lacks.
    pub(crate) fn build_from_object(
        &self,
        object: &Object,
        representation: &Object,
    ) -> Result<Object, String> {
        match self {
            ArgsBuilder::FromOriginalObject { arguments } => arguments
                .iter()
                .map(|(name, value)| {
                    let value = match value {
                        ArgumentValue::Field(field) => object
                            .get(field.as_str())
                            .cloned()
                            .ok_or_else(|| field.clone())?,
                        ArgumentValue::Representation => Value::Object(representation.clone()),
                        ArgumentValue::Constant(value) => value.clone(),
                    };
                    Ok((ByteString::from(name.as_str()), value))
                })
                .collect(),
            ArgsBuilder::FromKeyList { .. } => {
                Ok(self.build_from_keys(vec![Value::Object(representation.clone())]))
            }
        }
    }

    /// Builds the arguments of a batched call from the collected keys, in offer order.
    pub(crate) fn build_from_keys(&self, keys: Vec<Value>) -> Object {
        let mut args = Object::new();
        match self {
            ArgsBuilder::FromKeyList {
                argument,
                additional_arguments,
            } => {
                for (name, value) in additional_arguments {
                    args.insert(name.as_str(), value.clone());
                }
                args.insert(argument.as_str(), Value::Array(keys));
            }
            ArgsBuilder::FromOriginalObject { arguments } => {
                for (name, value) in arguments {
                    if let ArgumentValue::Constant(value) = value {
                        args.insert(name.as_str(), value.clone());
                    }
                }
            }
        }
        args
    }
}

impl KeyExtractor {
    /// Extracts the key of an entity or a result item. Compound keys are objects; a key is
    /// absent if any of its fields is absent or null.
    pub(crate) fn extract(&self, object: &Object) -> Option<Value> {
        match self {
            KeyExtractor::Field(field) => object
                .get(field.as_str())
                .filter(|value| !value.is_null())
                .cloned(),
            KeyExtractor::Fields(fields) => {
                let key = object.project(fields);
                (key.len() == fields.len() && key.values().all(|value| !value.is_null()))
                    .then_some(Value::Object(key))
            }
        }
    }

    pub(crate) fn selection_set(&self) -> SelectionSet {
        match self {
            KeyExtractor::Field(field) => std::iter::once(field.as_str()).collect(),
            KeyExtractor::Fields(fields) => fields.clone(),
        }
    }
}
