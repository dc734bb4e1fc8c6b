use std::{collections::HashMap, str::FromStr};

use potion::Error;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::TypeError;

pub type FormData = HashMap<String, Value>;

/// JSON request body with typed field accessors.
pub struct Form {
    inner: HashMap<String, Value>,
}

impl Form {
    pub fn from_data(data: FormData) -> Self {
        Self { inner: data }
    }

    pub fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Object(map) => Ok(Self {
                inner: map.into_iter().collect(),
            }),
            _ => Err(TypeError::new("Expected a JSON object").into()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn get_value<T>(&self, key: &str) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        match self.inner.get(key) {
            Some(value) => serde_json::from_value(value.to_owned())
                .map_err(|_e| TypeError::field(key, "Invalid type conversion").into()),
            None => Err(TypeError::field(key, "This field is required").into()),
        }
    }

    pub fn get_optional_value<T>(&self, key: &str) -> Result<Option<T>, Error>
    where
        T: DeserializeOwned,
    {
        match self.inner.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.get_value(key).map(Some),
        }
    }

    /// Accepts both JSON numbers and numeric strings.
    pub fn get_number<T>(&self, key: &str) -> Result<T, Error>
    where
        T: FromStr,
    {
        match self.inner.get(key) {
            Some(Value::Number(n)) => n
                .to_string()
                .parse()
                .map_err(|_e| TypeError::field(key, "Invalid type conversion").into()),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_e| TypeError::field(key, "Invalid type conversion").into()),
            Some(_) => Err(TypeError::field(key, "Expected a number").into()),
            None => Err(TypeError::field(key, "This field is required").into()),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<String, TypeError> {
        match self.inner.get(key) {
            Some(value) => match value.as_str() {
                Some(v) => Ok(v.to_string()),
                None => Err(TypeError::field(key, "Expected a string")),
            },
            None => Err(TypeError::field(key, "This field is required")),
        }
    }

    pub fn get_optional_str(&self, key: &str) -> Result<Option<String>, TypeError> {
        match self.inner.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.get_str(key).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn form(value: Value) -> Form {
        match Form::from_value(value) {
            Ok(form) => form,
            Err(_) => panic!("not an object"),
        }
    }

    #[test]
    fn numbers_accept_strings_and_numbers() {
        let form = form(json!({ "a": 15, "b": " 20 ", "c": "x", "d": [1] }));

        assert_eq!(form.get_number::<i32>("a").ok(), Some(15));
        assert_eq!(form.get_number::<i32>("b").ok(), Some(20));
        assert!(form.get_number::<i32>("c").is_err());
        assert!(form.get_number::<i32>("d").is_err());
        assert!(form.get_number::<i32>("missing").is_err());
    }

    #[test]
    fn optional_fields_treat_null_as_missing() {
        let form = form(json!({ "avatar": null, "name": "Borscht", "count": 3 }));

        assert_eq!(form.get_optional_str("avatar").ok(), Some(None));
        assert_eq!(form.get_optional_str("nope").ok(), Some(None));
        assert_eq!(
            form.get_optional_str("name").ok(),
            Some(Some("Borscht".to_string()))
        );
        assert!(form.get_optional_str("count").is_err());
    }

    #[test]
    fn typed_values_deserialize() {
        let form = form(json!({ "tags": [1, 2, 3] }));

        assert_eq!(form.get_value::<Vec<i32>>("tags").ok(), Some(vec![1, 2, 3]));
        assert!(form.get_value::<Vec<String>>("tags").is_err());
    }

    #[test]
    fn rejects_non_objects() {
        assert!(Form::from_value(json!([1, 2])).is_err());
    }
}
