//! Outbound commands: continuous motion and one-shot actions.

use serde::{Deserialize, Serialize};

/// Forward velocity limit (m/s).
pub const MAX_VX: f64 = 1.5;
/// Lateral velocity limit (m/s).
pub const MAX_VY: f64 = 0.5;
/// Yaw rate limit (rad/s).
pub const MAX_VYAW: f64 = 1.5;

/// A body-velocity command.
///
/// Fields are private so that a command can only be built through
/// [`MotionCommand::new`], which clamps every component to its limit.
/// Non-finite inputs become `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionCommand {
    vx: f64,
    vy: f64,
    vyaw: f64,
}

impl MotionCommand {
    pub const ZERO: MotionCommand = MotionCommand {
        vx: 0.0,
        vy: 0.0,
        vyaw: 0.0,
    };

    pub fn new(vx: f64, vy: f64, vyaw: f64) -> Self {
        Self {
            vx: clamp_finite(vx, MAX_VX),
            vy: clamp_finite(vy, MAX_VY),
            vyaw: clamp_finite(vyaw, MAX_VYAW),
        }
    }

    pub fn vx(&self) -> f64 {
        self.vx
    }

    pub fn vy(&self) -> f64 {
        self.vy
    }

    pub fn vyaw(&self) -> f64 {
        self.vyaw
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.vx, self.vy, self.vyaw]
    }

    pub fn is_zero(&self) -> bool {
        self.vx == 0.0 && self.vy == 0.0 && self.vyaw == 0.0
    }
}

fn clamp_finite(v: f64, limit: f64) -> f64 {
    if v.is_finite() { v.clamp(-limit, limit) } else { 0.0 }
}

/// Locomotion gait selectable on the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GaitType {
    Idle = 0,
    Walk = 1,
    Trot = 2,
    Run = 3,
    Climb = 4,
}

/// Coarse speed preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeedLevel {
    Low = 0,
    Medium = 1,
    High = 2,
}

/// Acrobatic and expressive behaviours. Each has a stable camelCase name
/// used by the CLI and the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpecialAction {
    FrontJump,
    FrontPounce,
    Dance1,
    Dance2,
    Stretch,
    Sit,
    Prone,
    FrontFlip,
    BackFlip,
    LeftFlip,
    RightFlip,
    Bark,
    FingerHeart,
    Greeting,
    HandStand,
    CrossStep,
    ShakeHand,
    Crouch,
    HighFive,
    WaveHand,
    Nap,
    Zombie,
    WiggleHips,
    Hello,
}

impl SpecialAction {
    pub const ALL: [SpecialAction; 24] = [
        SpecialAction::FrontJump,
        SpecialAction::FrontPounce,
        SpecialAction::Dance1,
        SpecialAction::Dance2,
        SpecialAction::Stretch,
        SpecialAction::Sit,
        SpecialAction::Prone,
        SpecialAction::FrontFlip,
        SpecialAction::BackFlip,
        SpecialAction::LeftFlip,
        SpecialAction::RightFlip,
        SpecialAction::Bark,
        SpecialAction::FingerHeart,
        SpecialAction::Greeting,
        SpecialAction::HandStand,
        SpecialAction::CrossStep,
        SpecialAction::ShakeHand,
        SpecialAction::Crouch,
        SpecialAction::HighFive,
        SpecialAction::WaveHand,
        SpecialAction::Nap,
        SpecialAction::Zombie,
        SpecialAction::WiggleHips,
        SpecialAction::Hello,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SpecialAction::FrontJump => "frontJump",
            SpecialAction::FrontPounce => "frontPounce",
            SpecialAction::Dance1 => "dance1",
            SpecialAction::Dance2 => "dance2",
            SpecialAction::Stretch => "stretch",
            SpecialAction::Sit => "sit",
            SpecialAction::Prone => "prone",
            SpecialAction::FrontFlip => "frontFlip",
            SpecialAction::BackFlip => "backFlip",
            SpecialAction::LeftFlip => "leftFlip",
            SpecialAction::RightFlip => "rightFlip",
            SpecialAction::Bark => "bark",
            SpecialAction::FingerHeart => "fingerHeart",
            SpecialAction::Greeting => "greeting",
            SpecialAction::HandStand => "handStand",
            SpecialAction::CrossStep => "crossStep",
            SpecialAction::ShakeHand => "shakeHand",
            SpecialAction::Crouch => "crouch",
            SpecialAction::HighFive => "highFive",
            SpecialAction::WaveHand => "waveHand",
            SpecialAction::Nap => "nap",
            SpecialAction::Zombie => "zombie",
            SpecialAction::WiggleHips => "wiggleHips",
            SpecialAction::Hello => "hello",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.name() == name)
    }

    /// Flips and jumps that the firmware only runs from a standing pose and
    /// that the CLI asks the operator to confirm.
    pub fn is_acrobatic(self) -> bool {
        matches!(
            self,
            SpecialAction::FrontJump
                | SpecialAction::FrontPounce
                | SpecialAction::FrontFlip
                | SpecialAction::BackFlip
                | SpecialAction::LeftFlip
                | SpecialAction::RightFlip
                | SpecialAction::HandStand
        )
    }
}

/// A named one-shot robot behaviour, as opposed to continuous motion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ActionRequest {
    StandUp,
    StandDown,
    BalanceStand,
    RecoveryStand,
    StopMove,
    Damp,
    EmergencyStop,
    Special(SpecialAction),
    /// Target body attitude in radians.
    Euler { roll: f64, pitch: f64, yaw: f64 },
    /// Body height offset in metres.
    BodyHeight(f64),
    SwitchGait(GaitType),
    SpeedLevel(SpeedLevel),
    ObstacleAvoidance(bool),
}

impl ActionRequest {
    /// Parse a camelCase action name (`"standUp"`, `"backFlip"`, ...).
    ///
    /// Only parameterless actions can be parsed this way.
    pub fn from_name(name: &str) -> Option<Self> {
        let basic = match name {
            "standUp" => Some(ActionRequest::StandUp),
            "standDown" => Some(ActionRequest::StandDown),
            "balanceStand" => Some(ActionRequest::BalanceStand),
            "recoveryStand" => Some(ActionRequest::RecoveryStand),
            "stopMove" => Some(ActionRequest::StopMove),
            "damp" => Some(ActionRequest::Damp),
            "emergencyStop" => Some(ActionRequest::EmergencyStop),
            _ => None,
        };
        basic.or_else(|| SpecialAction::from_name(name).map(ActionRequest::Special))
    }
}
