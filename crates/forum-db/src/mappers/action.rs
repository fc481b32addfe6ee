//! Action record <-> model mapper

use forum_core::entities::{ActionClass, ActionRecord};
use forum_core::error::DomainError;
use forum_core::traits::ActionWrite;
use forum_core::value_objects::Snowflake;

use crate::models::ActionRecordModel;

impl TryFrom<ActionRecordModel> for ActionRecord {
    type Error = DomainError;

    fn try_from(model: ActionRecordModel) -> Result<Self, Self::Error> {
        let class = ActionClass::from_code(model.class).ok_or_else(|| {
            DomainError::InconsistentState(format!(
                "action record {} has unknown class {}",
                model.id, model.class
            ))
        })?;
        let direction = i8::try_from(model.state).map_err(|_| {
            DomainError::InconsistentState(format!(
                "action record {} has out of range state {}",
                model.id, model.state
            ))
        })?;
        ActionRecord::new(
            Snowflake::new(model.actor_id),
            Snowflake::new(model.target_id),
            class,
            class.state_from_direction(direction)?,
        )
    }
}

/// Column values of one row to insert
#[derive(Debug, Clone, Copy)]
pub struct ActionInsert {
    pub id: i64,
    pub class: i16,
    pub actor_id: i64,
    pub target_id: i64,
    pub state: i16,
}

impl ActionInsert {
    pub fn new(write: &ActionWrite) -> Self {
        Self {
            id: write.row_id.into_inner(),
            class: write.record.class.code(),
            actor_id: write.record.actor_id.into_inner(),
            target_id: write.record.target_id.into_inner(),
            state: i16::from(write.record.state.direction()),
        }
    }
}
