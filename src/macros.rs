// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#[cfg(test)]
macro_rules! hash_map {
    () => {std::collections::HashMap::new()};
    ( $($key:expr => $value:expr),* $(,)? ) => {
        {
            let mut m = std::collections::HashMap::with_capacity(hash_map!(_capacity($($value),*)));
            $(
                m.insert($key, $value);
            )*
            m
        }
    };
    ( _capacity() ) => (0usize);
    ( _capacity($x:tt) ) => (1usize);
    ( _capacity($x:tt, $($xs:tt),*) ) => (1usize + hash_map!(_capacity($($xs),*)));
}

#[cfg(test)]
pub(crate) use hash_map;

/// Short notation for a `HashMap<String, Value>`, e.g., for query parameters
/// or auth tokens.
///
/// ```
/// use bolt_session::{value_map, Value};
///
/// let map = value_map!({"scheme": "basic", "answer": 42});
///
/// assert_eq!(map.get("scheme"), Some(&Value::String(String::from("basic"))));
/// assert_eq!(map.get("answer"), Some(&Value::Integer(42)));
/// assert!(value_map!().is_empty());
/// ```
#[macro_export]
macro_rules! value_map {
    ($(,)?) => {
        std::collections::HashMap::<String, $crate::Value>::new()
    };

    ({ $($key:literal : $value:expr),* $(,)? }) => {
        {
            #[allow(unused_mut)]
            let mut map = std::collections::HashMap::<String, $crate::Value>::new();
            $(
                map.insert(String::from($key), $crate::Value::from($value));
            )*
            map
        }
    };
}
