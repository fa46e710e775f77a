//! Surfaces and remote input.

pub mod injector;
pub mod surface;

pub use injector::RemoteInputInjector;
pub use surface::{
    Element, ElementId, InputEvent, MouseButton, ROOT_ELEMENT, Surface, key_code_for_char,
};
