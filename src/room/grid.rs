//! Participant grid layout.

use serde::Serialize;

/// Rows × columns the UI should lay the participant tiles out in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridLayout {
    pub rows: usize,
    pub cols: usize,
}

impl GridLayout {
    /// Breakpoints carried over from the meeting UI this service backs.
    pub fn for_count(count: usize) -> Self {
        let (rows, cols) = match count {
            0..=1 => (1, 1),
            2..=4 => (2, 2),
            5..=6 => (2, 3),
            7..=9 => (3, 3),
            10..=12 => (3, 4),
            13..=16 => (4, 4),
            _ => (5, 4),
        };
        Self { rows, cols }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_breakpoints() {
        let cases = [
            (0, 1, 1),
            (1, 1, 1),
            (2, 2, 2),
            (4, 2, 2),
            (5, 2, 3),
            (6, 2, 3),
            (9, 3, 3),
            (12, 3, 4),
            (16, 4, 4),
            (17, 5, 4),
            (40, 5, 4),
        ];
        for (count, rows, cols) in cases {
            assert_eq!(
                GridLayout::for_count(count),
                GridLayout { rows, cols },
                "count {count}"
            );
        }
    }
}
