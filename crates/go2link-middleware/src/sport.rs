//! Sport-service request encoding shared by the Direct and Peer transports.
//!
//! Every outbound request is `{"api_id": <int>, "parameter": {...}}` published
//! on a named topic.
//!
//! | Request | Topic | api_id | parameter |
//! |---|---|---|---|
//! | Damp / BalanceStand / StopMove / StandUp / StandDown / RecoveryStand | sport | 0 / 1 / 2 / 3 / 4 / 5 | `{}` |
//! | Euler | sport | 1006 | `{"roll","pitch","yaw"}` |
//! | Move | sport | 1008 | `{"x","y","z"}` |
//! | BodyHeight | sport | 1009 | `{"data":h}` |
//! | SwitchGait | sport | 1011 | `{"data":gait}` |
//! | SpeedLevel | sport | 1015 | `{"data":level}` |
//! | Hello | sport | 1016 | `{}` |
//! | Special actions | sport | 2001 – 2031 | `{"data":true}` |
//! | Obstacle avoidance on/off | avoid | 1001 | `{"enable":bool}` |
//! | Move while avoiding | avoid | 1002 | `{"x","y","z"}` |

use go2link_types::{ActionRequest, MotionCommand, SpecialAction};
use serde_json::{Value, json};

pub mod topic {
    pub const SPORT_MOD: &str = "rt/api/sport/request";
    pub const OBSTACLES_AVOID: &str = "rt/api/obstacles_avoid/request";
    pub const LOW_STATE: &str = "rt/lf/lowstate";
    pub const SPORT_STATE: &str = "rt/sportmodestate";
    pub const LIDAR: &str = "rt/utlidar/cloud";
    pub const AUDIO: &str = "rt/audio/pcm";
}

pub mod api {
    pub const DAMP: u32 = 0;
    pub const BALANCE_STAND: u32 = 1;
    pub const STOP_MOVE: u32 = 2;
    pub const STAND_UP: u32 = 3;
    pub const STAND_DOWN: u32 = 4;
    pub const RECOVERY_STAND: u32 = 5;
    pub const POSE: u32 = 1005;
    pub const EULER: u32 = 1006;
    pub const MOVE: u32 = 1008;
    pub const BODY_HEIGHT: u32 = 1009;
    pub const SWITCH_GAIT: u32 = 1011;
    pub const SPEED_LEVEL: u32 = 1015;
    pub const HELLO: u32 = 1016;

    pub const AVOID_SWITCH: u32 = 1001;
    pub const AVOID_MOVE: u32 = 1002;
}

/// One request addressed to a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct SportRequest {
    pub topic: &'static str,
    pub api_id: u32,
    pub parameter: Value,
}

impl SportRequest {
    fn sport(api_id: u32, parameter: Value) -> Self {
        Self {
            topic: topic::SPORT_MOD,
            api_id,
            parameter,
        }
    }

    /// Wire body published on [`topic`][Self::topic].
    pub fn body(&self) -> Value {
        json!({ "api_id": self.api_id, "parameter": self.parameter })
    }
}

pub fn special_api_id(action: SpecialAction) -> u32 {
    match action {
        SpecialAction::FrontJump => 2001,
        SpecialAction::FrontPounce => 2002,
        SpecialAction::Dance1 => 2003,
        SpecialAction::Dance2 => 2004,
        SpecialAction::Stretch => 2005,
        SpecialAction::Sit => 2006,
        SpecialAction::Prone => 2007,
        SpecialAction::FrontFlip => 2008,
        SpecialAction::BackFlip => 2009,
        SpecialAction::LeftFlip => 2010,
        SpecialAction::RightFlip => 2011,
        SpecialAction::Bark => 2012,
        SpecialAction::FingerHeart => 2020,
        SpecialAction::Greeting => 2022,
        SpecialAction::HandStand => 2023,
        SpecialAction::CrossStep => 2024,
        SpecialAction::ShakeHand => 2025,
        SpecialAction::Crouch => 2026,
        SpecialAction::HighFive => 2027,
        SpecialAction::WaveHand => 2028,
        SpecialAction::Nap => 2029,
        SpecialAction::Zombie => 2030,
        SpecialAction::WiggleHips => 2031,
        SpecialAction::Hello => api::HELLO,
    }
}

/// Velocity request. With obstacle avoidance on, motion goes through the
/// avoidance service instead of the sport service.
pub fn move_request(cmd: &MotionCommand, avoid: bool) -> SportRequest {
    let parameter = json!({ "x": cmd.vx(), "y": cmd.vy(), "z": cmd.vyaw() });
    if avoid {
        SportRequest {
            topic: topic::OBSTACLES_AVOID,
            api_id: api::AVOID_MOVE,
            parameter,
        }
    } else {
        SportRequest::sport(api::MOVE, parameter)
    }
}

/// Requests for one action. `EmergencyStop` expands to stop-then-damp.
pub fn action_requests(action: &ActionRequest) -> Vec<SportRequest> {
    let empty = || json!({});
    let req = match *action {
        ActionRequest::Damp => SportRequest::sport(api::DAMP, empty()),
        ActionRequest::BalanceStand => SportRequest::sport(api::BALANCE_STAND, empty()),
        ActionRequest::StopMove => SportRequest::sport(api::STOP_MOVE, empty()),
        ActionRequest::StandUp => SportRequest::sport(api::STAND_UP, empty()),
        ActionRequest::StandDown => SportRequest::sport(api::STAND_DOWN, empty()),
        ActionRequest::RecoveryStand => SportRequest::sport(api::RECOVERY_STAND, empty()),
        ActionRequest::EmergencyStop => {
            return vec![
                SportRequest::sport(api::STOP_MOVE, empty()),
                SportRequest::sport(api::DAMP, empty()),
            ];
        }
        ActionRequest::Special(SpecialAction::Hello) => SportRequest::sport(api::HELLO, empty()),
        ActionRequest::Special(special) => {
            SportRequest::sport(special_api_id(special), json!({ "data": true }))
        }
        ActionRequest::Euler { roll, pitch, yaw } => SportRequest::sport(
            api::EULER,
            json!({ "roll": roll, "pitch": pitch, "yaw": yaw }),
        ),
        ActionRequest::BodyHeight(h) => SportRequest::sport(api::BODY_HEIGHT, json!({ "data": h })),
        ActionRequest::SwitchGait(gait) => {
            SportRequest::sport(api::SWITCH_GAIT, json!({ "data": gait as u8 }))
        }
        ActionRequest::SpeedLevel(level) => {
            SportRequest::sport(api::SPEED_LEVEL, json!({ "data": level as u8 }))
        }
        ActionRequest::ObstacleAvoidance(enable) => SportRequest {
            topic: topic::OBSTACLES_AVOID,
            api_id: api::AVOID_SWITCH,
            parameter: json!({ "enable": enable }),
        },
    };
    vec![req]
}
