use crate::value_objects::Snowflake;

/// Issues unique 64-bit ids for comments, action rows and events
pub trait IdentityProvider: Send + Sync {
    fn next_id(&self) -> Snowflake;
}
