//! The pixel/UI source an app streams from.
//!
//! A surface is anything that can paint itself into a [`RawFrame`] and
//! answer "what is under this point" / "what has focus". The demo
//! renderer in the server crate and the test doubles both implement it.

use crate::error::VistreamError;
use crate::media::RawFrame;

/// Identifier of an interactive element on a surface.
pub type ElementId = u32;

/// The surface itself, used when no element matches.
pub const ROOT_ELEMENT: ElementId = 0;

/// An element hit by a lookup, with its origin in surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element {
    pub id: ElementId,
    pub origin_x: i32,
    pub origin_y: i32,
}

impl Element {
    pub const fn root() -> Self {
        Self {
            id: ROOT_ELEMENT,
            origin_x: 0,
            origin_y: 0,
        }
    }

    /// Convert surface coordinates into this element's local space.
    pub fn to_local(&self, x: i32, y: i32) -> (i32, i32) {
        (x - self.origin_x, y - self.origin_y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Primary,
}

/// A synthesized input event. Coordinates are element-local.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    MousePressed { x: i32, y: i32, button: MouseButton },
    MouseReleased { x: i32, y: i32, button: MouseButton },
    MouseClicked { x: i32, y: i32, button: MouseButton },
    KeyPressed { code: u32, ch: char },
    KeyTyped { ch: char },
    KeyReleased { code: u32, ch: char },
}

/// Frame source and input target of one app.
pub trait Surface: Send + Sync {
    /// Pixel size of the captured frame.
    fn size(&self) -> (u32, u32);

    /// Paint the current state into `frame`. Blocking.
    fn capture(&self, frame: &mut RawFrame) -> Result<(), VistreamError>;

    /// Deepest interactive element containing the point.
    fn element_at(&self, x: i32, y: i32) -> Option<Element>;

    /// Element holding keyboard focus.
    fn focused(&self) -> Option<Element>;

    /// Deliver one event to an element.
    fn dispatch(&self, target: ElementId, event: InputEvent);
}

/// Key code for a typed character.
///
/// Characters with a virtual key (letters, digits, space, most ASCII
/// punctuation, a few controls) map to it; letters use their upper-case
/// key. Everything else is `0x0100_0000 + code point`.
pub fn key_code_for_char(ch: char) -> u32 {
    match ch {
        'a'..='z' => ch.to_ascii_uppercase() as u32,
        'A'..='Z' | '0'..='9' => ch as u32,
        '\u{08}' | '\t' | '\n' | '\u{1B}' | ' ' | '\u{7F}' => ch as u32,
        ',' | '-' | '.' | '/' | ';' | '=' | '[' | '\\' | ']' => ch as u32,
        '@' => 0x0200,
        ':' => 0x0201,
        '^' => 0x0202,
        '$' => 0x0203,
        '\u{20AC}' => 0x0204,
        '!' => 0x0205,
        '\u{A1}' => 0x0206,
        '(' => 0x0207,
        '#' => 0x0208,
        '+' => 0x0209,
        ')' => 0x020A,
        '_' => 0x020B,
        '&' => 0x96,
        '*' => 0x97,
        '"' => 0x98,
        '<' => 0x99,
        '>' => 0xA0,
        '{' => 0xA1,
        '}' => 0xA2,
        '`' => 0xC0,
        '\'' => 0xDE,
        _ => 0x0100_0000 + ch as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_codes() {
        assert_eq!(key_code_for_char('a'), 0x41);
        assert_eq!(key_code_for_char('Z'), 0x5A);
        assert_eq!(key_code_for_char('7'), 0x37);
        assert_eq!(key_code_for_char(' '), 0x20);
        assert_eq!(key_code_for_char(','), 0x2C);
        assert_eq!(key_code_for_char('\u{08}'), 0x08);
        assert_eq!(key_code_for_char('!'), 0x0205);
        assert_eq!(key_code_for_char('\''), 0xDE);
        assert_eq!(key_code_for_char('%'), 0x0100_0025);
        assert_eq!(key_code_for_char('é'), 0x0100_00E9);
    }

    #[test]
    fn local_coordinates() {
        let el = Element {
            id: 3,
            origin_x: 100,
            origin_y: 40,
        };
        assert_eq!(el.to_local(110, 45), (10, 5));
        assert_eq!(Element::root().to_local(9, 9), (9, 9));
    }
}
