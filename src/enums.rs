use std::fmt;
use std::str::FromStr;

/// Compositing mode selected per frame.
///
/// The discriminants are the values of the `render_mode` uniform read by the
/// ray-casting shader.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RenderMode {
    #[default]
    VolumeRendering = 0,
    MaximumIntensityProjection = 1,
    MinimumIntensityProjection = 2,
}

/// How the scalar field is sampled between voxel centers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Sampling {
    #[default]
    Trilinear,
    Nearest,
}

/// Named anatomical camera orientations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardView {
    Anterior,
    Posterior,
    Left,
    Right,
    Superior,
    Inferior,
}

impl StandardView {
    pub const ALL: [StandardView; 6] = [
        StandardView::Anterior,
        StandardView::Posterior,
        StandardView::Left,
        StandardView::Right,
        StandardView::Superior,
        StandardView::Inferior,
    ];

    /// `(pitch, yaw)` in degrees.
    pub fn rotation(self) -> (f32, f32) {
        match self {
            StandardView::Anterior => (0.0, 0.0),
            StandardView::Posterior => (0.0, 180.0),
            StandardView::Left => (0.0, -90.0),
            StandardView::Right => (0.0, 90.0),
            StandardView::Superior => (-90.0, 0.0),
            StandardView::Inferior => (90.0, 0.0),
        }
    }
}

/// Built-in transfer-function presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    CtBone,
    CtSoftTissue,
    CtLung,
    Mip,
}

impl Preset {
    pub const ALL: [Preset; 4] = [
        Preset::CtBone,
        Preset::CtSoftTissue,
        Preset::CtLung,
        Preset::Mip,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Preset::CtBone => "ct-bone",
            Preset::CtSoftTissue => "ct-soft-tissue",
            Preset::CtLung => "ct-lung",
            Preset::Mip => "mip",
        }
    }
}

/// Returned when a name does not match any variant of the target enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {name}")]
pub struct UnknownName {
    pub kind: &'static str,
    pub name: String,
}

impl UnknownName {
    fn new(kind: &'static str, name: &str) -> Self {
        Self {
            kind,
            name: name.to_owned(),
        }
    }
}

impl FromStr for Preset {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Preset::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownName::new("preset", s))
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RenderMode {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vr" | "volume" => Ok(RenderMode::VolumeRendering),
            "mip" => Ok(RenderMode::MaximumIntensityProjection),
            "minip" => Ok(RenderMode::MinimumIntensityProjection),
            _ => Err(UnknownName::new("render mode", s)),
        }
    }
}

impl FromStr for StandardView {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "anterior" => Ok(StandardView::Anterior),
            "posterior" => Ok(StandardView::Posterior),
            "left" => Ok(StandardView::Left),
            "right" => Ok(StandardView::Right),
            "superior" => Ok(StandardView::Superior),
            "inferior" => Ok(StandardView::Inferior),
            _ => Err(UnknownName::new("standard view", s)),
        }
    }
}

/// Slice ordering used when stacking DICOM images into a volume.
#[derive(Debug, Default, Clone, Copy)]
pub enum SortBy {
    #[default]
    ImagePositionPatient,
    InstanceNumber,
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_names_round_trip() {
        for preset in Preset::ALL {
            assert_eq!(preset.name().parse::<Preset>(), Ok(preset));
        }
        assert!("ct-brain".parse::<Preset>().is_err());
    }

    #[test]
    fn parses_modes_and_views() {
        assert_eq!("MinIP".parse::<RenderMode>(), Ok(RenderMode::MinimumIntensityProjection));
        assert_eq!("right".parse::<StandardView>().map(StandardView::rotation), Ok((0.0, 90.0)));
        assert!("oblique".parse::<StandardView>().is_err());
    }
}
