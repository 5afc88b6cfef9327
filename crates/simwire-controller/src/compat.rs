//! Rewrites for request shapes older simulator builds accepted.

use serde_json::json;
use tracing::warn;

use crate::action::Action;

/// Expand a scalar `rotation` into `{"y": <number>}`.
///
/// Returns true when the action was rewritten. Nested rotations are left
/// alone; only the top-level argument ever had the scalar form.
pub fn normalize_scalar_rotation(action: &mut Action) -> bool {
    let name = action.name().to_owned();
    let Some(rotation) = action.as_map_mut().get_mut("rotation") else {
        return false;
    };
    if !rotation.is_number() {
        return false;
    }

    warn!(
        action = %name,
        "scalar rotation is deprecated; send rotation as {{\"y\": <degrees>}}"
    );
    *rotation = json!({ "y": rotation.take() });
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_rotation_becomes_yaw() {
        let mut action = Action::new("RotateAgent").arg("rotation", 90);
        assert!(normalize_scalar_rotation(&mut action));
        assert_eq!(action.get("rotation"), Some(&json!({ "y": 90 })));
    }

    #[test]
    fn object_rotation_untouched() {
        let mut action = Action::new("Teleport").arg("rotation", json!({ "y": 180.0 }));
        assert!(!normalize_scalar_rotation(&mut action));
        assert_eq!(action.get("rotation"), Some(&json!({ "y": 180.0 })));

        let mut action = Action::new("Pass");
        assert!(!normalize_scalar_rotation(&mut action));
    }
}
