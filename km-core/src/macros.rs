// Generate labels or annotations for a k8s object, using klabel!("key1" => "value1", KEY2 => value2)
#[macro_export]
macro_rules! klabel {
    ($($key:expr => $val:expr),+ $(,)?) => {
        Some(::std::collections::BTreeMap::from([$(($key.to_string(), $val.to_string())),+]))
    };
}

pub use klabel;
