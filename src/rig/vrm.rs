use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::graph::NodeId;

// ─── Meta ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AllowedUser {
    #[default]
    OnlyAuthor,
    ExplicitlyLicensedPerson,
    Everyone,
}

impl AllowedUser {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllowedUser::OnlyAuthor => "OnlyAuthor",
            AllowedUser::ExplicitlyLicensedPerson => "ExplicitlyLicensedPerson",
            AllowedUser::Everyone => "Everyone",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UsagePermission {
    #[default]
    Disallow,
    Allow,
}

impl UsagePermission {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsagePermission::Disallow => "Disallow",
            UsagePermission::Allow => "Allow",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LicenseType {
    #[default]
    RedistributionProhibited,
    Cc0,
    CcBy,
    CcByNc,
    CcBySa,
    CcByNcSa,
    CcByNd,
    CcByNcNd,
    Other,
}

impl LicenseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseType::RedistributionProhibited => "Redistribution_Prohibited",
            LicenseType::Cc0 => "CC0",
            LicenseType::CcBy => "CC_BY",
            LicenseType::CcByNc => "CC_BY_NC",
            LicenseType::CcBySa => "CC_BY_SA",
            LicenseType::CcByNcSa => "CC_BY_NC_SA",
            LicenseType::CcByNd => "CC_BY_ND",
            LicenseType::CcByNcNd => "CC_BY_NC_ND",
            LicenseType::Other => "Other",
        }
    }
}

/// Author/descriptive record copied verbatim into the output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarMeta {
    pub title: String,
    pub version: String,
    pub author: String,
    pub contact_information: String,
    pub reference: String,
    pub allowed_user: AllowedUser,
    pub violent_usage: UsagePermission,
    pub sexual_usage: UsagePermission,
    pub commercial_usage: UsagePermission,
    pub other_permission_url: String,
    pub license: LicenseType,
    pub other_license_url: String,
}

// ─── First person ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FirstPersonFlag {
    #[default]
    Auto,
    Both,
    ThirdPersonOnly,
    FirstPersonOnly,
}

impl FirstPersonFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FirstPersonFlag::Auto => "Auto",
            FirstPersonFlag::Both => "Both",
            FirstPersonFlag::ThirdPersonOnly => "ThirdPersonOnly",
            FirstPersonFlag::FirstPersonOnly => "FirstPersonOnly",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererVisibility {
    pub renderer: NodeId,
    pub flag: FirstPersonFlag,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FirstPersonConfig {
    /// Bone the camera anchor hangs off (the head).
    pub bone: Option<NodeId>,
    /// Anchor offset from `bone`, in the bone's frame.
    pub offset: Vector3<f32>,
    pub renderers: Vec<RendererVisibility>,
}

// ─── Look at ──────────────────────────────────────────────────────────────────

/// Maximum eye rotation per look direction, in degrees.
///
/// `left`/`right` bound each gaze direction by the narrower eye. The
/// horizontal curves pair each eye's own motion instead: `horizontal_outer`
/// covers an eye turning away from the nose, `horizontal_inner` towards it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LookAtRange {
    pub up: f32,
    pub down: f32,
    pub left: f32,
    pub right: f32,
    pub horizontal_outer: f32,
    pub horizontal_inner: f32,
}

impl LookAtRange {
    pub fn symmetric(degrees: f32) -> Self {
        Self {
            up: degrees,
            down: degrees,
            left: degrees,
            right: degrees,
            horizontal_outer: degrees,
            horizontal_inner: degrees,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LookAtConfig {
    /// `None` keeps the destination format's default curves.
    pub range: Option<LookAtRange>,
}

// ─── Expressions ──────────────────────────────────────────────────────────────

/// Enumerated facial-expression presets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionPreset {
    Neutral,
    A,
    I,
    U,
    E,
    O,
    Blink,
    Joy,
    Angry,
    Sorrow,
    Fun,
    LookUp,
    LookDown,
    LookLeft,
    LookRight,
    BlinkL,
    BlinkR,
}

impl ExpressionPreset {
    /// Preset name as written into the destination file.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpressionPreset::Neutral => "neutral",
            ExpressionPreset::A => "a",
            ExpressionPreset::I => "i",
            ExpressionPreset::U => "u",
            ExpressionPreset::E => "e",
            ExpressionPreset::O => "o",
            ExpressionPreset::Blink => "blink",
            ExpressionPreset::Joy => "joy",
            ExpressionPreset::Angry => "angry",
            ExpressionPreset::Sorrow => "sorrow",
            ExpressionPreset::Fun => "fun",
            ExpressionPreset::LookUp => "lookup",
            ExpressionPreset::LookDown => "lookdown",
            ExpressionPreset::LookLeft => "lookleft",
            ExpressionPreset::LookRight => "lookright",
            ExpressionPreset::BlinkL => "blink_l",
            ExpressionPreset::BlinkR => "blink_r",
        }
    }

    /// Display name used for the expression group.
    pub fn display_name(&self) -> &'static str {
        match self {
            ExpressionPreset::Neutral => "Neutral",
            ExpressionPreset::A => "A",
            ExpressionPreset::I => "I",
            ExpressionPreset::U => "U",
            ExpressionPreset::E => "E",
            ExpressionPreset::O => "O",
            ExpressionPreset::Blink => "Blink",
            ExpressionPreset::Joy => "Joy",
            ExpressionPreset::Angry => "Angry",
            ExpressionPreset::Sorrow => "Sorrow",
            ExpressionPreset::Fun => "Fun",
            ExpressionPreset::LookUp => "LookUp",
            ExpressionPreset::LookDown => "LookDown",
            ExpressionPreset::LookLeft => "LookLeft",
            ExpressionPreset::LookRight => "LookRight",
            ExpressionPreset::BlinkL => "Blink_L",
            ExpressionPreset::BlinkR => "Blink_R",
        }
    }
}

/// One shape key driven by an expression group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendShapeBind {
    /// Node carrying the renderer whose mesh owns the shape key.
    pub renderer: NodeId,
    /// Shape-key index within that mesh.
    pub index: usize,
    /// Target weight (0..100).
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendShapeGroup {
    pub name: String,
    pub preset: ExpressionPreset,
    #[serde(default)]
    pub binds: Vec<BlendShapeBind>,
}
