use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;

/// Display colors handed out to groups.
pub const PALETTE: [&str; 5] = ["#7BFF00", "#FFFF61", "#FF18C8", "#972AFF", "#1BEAFF"];

pub fn random_color<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    PALETTE.choose(rng).copied().unwrap_or(PALETTE[0])
}

/// Assigns one color per distinct group id, picked at random on first sight.
#[derive(Debug, Default)]
pub struct ColorAssigner {
    assigned: HashMap<String, &'static str>,
}

impl ColorAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn color_for<R: Rng + ?Sized>(&mut self, group_id: &str, rng: &mut R) -> &'static str {
        if let Some(color) = self.assigned.get(group_id) {
            return color;
        }
        let color = random_color(rng);
        self.assigned.insert(group_id.to_string(), color);
        color
    }
}

/// Converts `#rgb` / `#rrggbb` to a CSS `rgba()` string, used for hover tints.
pub fn hex_to_rgba(hex: &str, alpha: f32) -> Option<String> {
    let hex = hex.trim_start_matches('#');
    if !hex.is_ascii() {
        return None;
    }
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return None,
    };

    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&expanded[range], 16).ok();
    let (r, g, b) = (channel(0..2)?, channel(2..4)?, channel(4..6)?);

    Some(format!("rgba({r}, {g}, {b}, {alpha})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn assigner_is_stable_per_group() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut assigner = ColorAssigner::new();

        let first = assigner.color_for("001", &mut rng);
        for _ in 0..10 {
            assert_eq!(assigner.color_for("001", &mut rng), first);
        }
        assert!(PALETTE.contains(&assigner.color_for("002", &mut rng)));
    }

    #[test]
    fn hex_to_rgba_handles_short_and_long_forms() {
        assert_eq!(hex_to_rgba("#abc", 0.3).as_deref(), Some("rgba(170, 187, 204, 0.3)"));
        assert_eq!(hex_to_rgba("#7BFF00", 0.5).as_deref(), Some("rgba(123, 255, 0, 0.5)"));
        assert_eq!(hex_to_rgba("#12", 0.5), None);
        assert_eq!(hex_to_rgba("#zzzzzz", 0.5), None);
    }
}
