mod computed_fields;
mod registration;
mod support;
