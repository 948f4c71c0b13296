//! Fault injection hooks (feature: `failpoints`).
//!
//! Names starting with `panic_` panic when the feature is on. Without the
//! feature the macro expands to nothing.

#[cfg(feature = "failpoints")]
#[macro_export]
macro_rules! fail_point {
    ($name:expr) => {{
        let name: &str = $name;
        if name.starts_with("panic_") {
            panic!("failpoint triggered: {}", name);
        }
    }};
}

#[cfg(not(feature = "failpoints"))]
#[macro_export]
macro_rules! fail_point {
    ($name:expr) => {{
        let _ = $name;
    }};
}
