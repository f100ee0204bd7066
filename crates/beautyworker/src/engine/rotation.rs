/// Native rotation enumerants.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None = 0,
    Quarter = 1,
    Half = 2,
    ThreeQuarters = 3,
}

impl Rotation {
    /// Normalises signed degrees modulo 360. Anything that is not a multiple
    /// of 90 maps to [`Rotation::None`].
    pub fn from_degrees(degrees: i64) -> Self {
        match degrees.rem_euclid(360) {
            90 => Rotation::Quarter,
            180 => Rotation::Half,
            270 => Rotation::ThreeQuarters,
            _ => Rotation::None,
        }
    }

    /// Parses an integer number of degrees; unparsable text means no rotation.
    pub fn from_text(text: &str) -> Self {
        text.trim()
            .parse::<i64>()
            .map(Self::from_degrees)
            .unwrap_or_default()
    }

    pub fn native(self) -> i32 {
        self as i32
    }

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::None => 0,
            Rotation::Quarter => 90,
            Rotation::Half => 180,
            Rotation::ThreeQuarters => 270,
        }
    }
}

/// Rotation as requested by a caller, numeric or textual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationDegrees {
    Value(i64),
    Text(String),
}

impl Default for RotationDegrees {
    fn default() -> Self {
        RotationDegrees::Value(0)
    }
}

impl From<i64> for RotationDegrees {
    fn from(value: i64) -> Self {
        RotationDegrees::Value(value)
    }
}

impl From<i32> for RotationDegrees {
    fn from(value: i32) -> Self {
        RotationDegrees::Value(value.into())
    }
}

impl From<&str> for RotationDegrees {
    fn from(value: &str) -> Self {
        RotationDegrees::Text(value.to_string())
    }
}

impl From<String> for RotationDegrees {
    fn from(value: String) -> Self {
        RotationDegrees::Text(value)
    }
}

impl From<&RotationDegrees> for Rotation {
    fn from(value: &RotationDegrees) -> Self {
        match value {
            RotationDegrees::Value(degrees) => Rotation::from_degrees(*degrees),
            RotationDegrees::Text(text) => Rotation::from_text(text),
        }
    }
}

impl From<RotationDegrees> for Rotation {
    fn from(value: RotationDegrees) -> Self {
        Rotation::from(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn right_angles_map_to_distinct_enumerants() {
        let natives: Vec<i32> = [0, 90, 180, 270]
            .into_iter()
            .map(|deg| Rotation::from_degrees(deg).native())
            .collect();
        assert_eq!(natives, vec![0, 1, 2, 3]);
    }

    #[test]
    fn normalises_modulo_full_turn() {
        assert_eq!(Rotation::from_degrees(-90), Rotation::ThreeQuarters);
        assert_eq!(Rotation::from_degrees(360), Rotation::None);
        assert_eq!(Rotation::from_degrees(450), Rotation::Quarter);
        assert_eq!(Rotation::from_degrees(-540), Rotation::Half);
    }

    #[test]
    fn odd_angles_mean_no_rotation() {
        assert_eq!(Rotation::from_degrees(45), Rotation::None);
        assert_eq!(Rotation::from_degrees(91), Rotation::None);
    }

    #[test]
    fn text_is_parsed_or_ignored() {
        assert_eq!(Rotation::from(RotationDegrees::from("not-a-number")), Rotation::None);
        assert_eq!(Rotation::from(RotationDegrees::from(" 180 ")), Rotation::Half);
        assert_eq!(Rotation::from(RotationDegrees::from("-90")), Rotation::ThreeQuarters);
        assert_eq!(Rotation::from(RotationDegrees::from("90.0")), Rotation::None);
    }
}
