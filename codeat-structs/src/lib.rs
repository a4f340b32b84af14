pub mod config;
pub mod report;

/// Declares a serde struct whose `Option` fields get an unwrapping getter.
///
/// Attributes written before the struct name are forwarded to the struct, so
/// `#[serde(default)]` or extra derives can be attached per type.
#[macro_export]
macro_rules! serializable_struct_with_getters {
    ( @ [$(#[$sattr:meta])*] $name:ident { } -> ($($fields:tt)*) ($($getters:tt)*) ) => (
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
        $(#[$sattr])*
        pub struct $name {
            $($fields)*
        }
        impl $name {
            $($getters)*
        }
    );
    ( @ [$(#[$sattr:meta])*] $name:ident { $(#[$attr:meta])* $param:ident : Option<$type:ty>, $($rest:tt)* } -> ($($fields:tt)*) ($($getters:tt)*) ) => (
        serializable_struct_with_getters!(@ [$(#[$sattr])*] $name { $($rest)* } -> (
            $($fields)*
            $(#[$attr])*
            #[serde(default)]
            pub $param : Option<$type>,
        ) (
            $($getters)*
            pub fn $param(&self) -> &$type {
                self.$param.as_ref().expect(
                    format!("Expected {}.{} to be Some, but it was None", stringify!($name), stringify!($param)).as_str()
                )
            }
        ));
    );
    ( @ [$(#[$sattr:meta])*] $name:ident { $(#[$attr:meta])* $param:ident : $type:ty, $($rest:tt)* } -> ($($fields:tt)*) ($($getters:tt)*) ) => (
        serializable_struct_with_getters!(@ [$(#[$sattr])*] $name { $($rest)* } -> (
            $($fields)*
            $(#[$attr])*
            pub $param : $type,
        ) (
            $($getters)*
        ));
    );
    ( $(#[$sattr:meta])* $name:ident { $( $rest:tt)* } ) => {
        serializable_struct_with_getters!(@ [$(#[$sattr])*] $name { $($rest)* } -> () ());
    };
}
