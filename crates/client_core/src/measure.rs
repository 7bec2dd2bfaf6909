//! Text measurement oracle used by pagination.

/// Reports how much of `text` fits a `width` x `height` box for the active
/// font settings.
pub trait TextMeasure: Send + Sync {
    /// Byte length of the longest prefix of `text` that fits. Implementations
    /// may return `0`; pagination then force-advances on its own.
    fn fits(&self, text: &str, width: f64, height: f64) -> usize;
}

/// Fixed-advance measurement: every char takes one cell, `\n` ends a row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonospaceMeasure {
    pub char_width: f64,
    pub line_height: f64,
}

impl MonospaceMeasure {
    pub fn new(char_width: f64, line_height: f64) -> Self {
        Self {
            char_width,
            line_height,
        }
    }

    pub fn grid(&self, width: f64, height: f64) -> (usize, usize) {
        (cells(width, self.char_width), cells(height, self.line_height))
    }
}

fn cells(extent: f64, unit: f64) -> usize {
    let count = (extent / unit).floor();
    if count.is_finite() && count > 0.0 {
        count as usize
    } else {
        0
    }
}

impl TextMeasure for MonospaceMeasure {
    fn fits(&self, text: &str, width: f64, height: f64) -> usize {
        let (columns, rows) = self.grid(width, height);
        if columns == 0 || rows == 0 {
            return 0;
        }

        let mut row = 0;
        let mut column = 0;
        for (index, ch) in text.char_indices() {
            if ch == '\n' {
                row += 1;
                column = 0;
                if row == rows {
                    return index + ch.len_utf8();
                }
                continue;
            }
            if column == columns {
                row += 1;
                column = 0;
                if row == rows {
                    return index;
                }
            }
            column += 1;
        }
        text.len()
    }
}
