use serde::{Deserialize, Serialize};

use super::Placement;

/// Tiles session windows in a grid, left to right then top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    #[serde(default = "default_columns")]
    pub columns: u32,
    #[serde(default = "default_screen_width")]
    pub screen_width: u32,
    #[serde(default = "default_screen_height")]
    pub screen_height: u32,
    /// Display scaling; window size is `screen / scale_factor`.
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
}

fn default_columns() -> u32 {
    2
}

fn default_screen_width() -> u32 {
    1280
}

fn default_screen_height() -> u32 {
    800
}

fn default_scale_factor() -> f64 {
    1.5
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            columns: default_columns(),
            screen_width: default_screen_width(),
            screen_height: default_screen_height(),
            scale_factor: default_scale_factor(),
        }
    }
}

impl Layout {
    pub fn window_size(&self) -> (u32, u32) {
        let scale = if self.scale_factor > 0.0 { self.scale_factor } else { 1.0 };
        (
            (f64::from(self.screen_width) / scale) as u32,
            (f64::from(self.screen_height) / scale) as u32,
        )
    }

    /// Placement of the window for `slot`. Stable for the slot's lifetime,
    /// so a replacement session lands where the old one was.
    pub fn placement(&self, slot: usize) -> Placement {
        let (width, height) = self.window_size();
        let columns = self.columns.max(1) as usize;
        Placement {
            x: (slot % columns) as u32 * width,
            y: (slot / columns) as u32 * height,
            width,
            height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_slots_tile_two_by_two() {
        let layout = Layout::default();
        assert_eq!(layout.window_size(), (853, 533));
        assert_eq!(
            layout.placement(0),
            Placement { x: 0, y: 0, width: 853, height: 533 }
        );
        assert_eq!(layout.placement(1).x, 853);
        assert_eq!(layout.placement(1).y, 0);
        assert_eq!(layout.placement(2).x, 0);
        assert_eq!(layout.placement(2).y, 533);
        assert_eq!(layout.placement(3).x, 853);
        assert_eq!(layout.placement(3).y, 533);
    }

    #[test]
    fn zero_columns_and_scale_degrade_gracefully() {
        let layout = Layout {
            columns: 0,
            screen_width: 1000,
            screen_height: 500,
            scale_factor: 0.0,
        };
        assert_eq!(layout.placement(2), Placement { x: 0, y: 1000, width: 1000, height: 500 });
    }
}
