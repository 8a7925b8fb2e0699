/*
[INPUT]:  Exchange schema definitions and serde requirements
[OUTPUT]: Typed Rust structs/enums with serialization support
[POS]:    Data layer - type definitions for API communication
[UPDATE]: When API schema changes or new types added
*/

pub mod enums;
pub mod events;
pub mod models;
pub mod subscription;

pub use enums::*;
pub use events::*;
pub use models::*;
pub use subscription::*;
