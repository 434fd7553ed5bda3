//! Monster summoning: a free-text prompt becomes an enemy token.

use realmlink_domain::{
    DomainError, Entity, EntityId, EntityKind, GeneratedStats, RoomId, SessionState,
};

use crate::infrastructure::ports::{StatGenError, StatGeneratorPort};

/// Ask the generator for stats. Missing values get the usual defaults.
pub async fn generate_stats(
    generator: &dyn StatGeneratorPort,
    prompt: &str,
) -> Result<GeneratedStats, StatGenError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(StatGenError::RequestFailed("Prompt is empty".into()));
    }
    let stats = generator.generate(prompt).await?;
    tracing::debug!(name = %stats.name, hp = stats.hp, ac = stats.ac, "Generated stats");
    Ok(stats.with_fallbacks())
}

/// Place the summoned enemy at the free cell nearest the room centre.
pub fn place_monster(
    state: &mut SessionState,
    room_id: RoomId,
    stats: &GeneratedStats,
) -> Result<EntityId, DomainError> {
    let room = state
        .room(room_id)
        .ok_or_else(|| DomainError::not_found("Room", room_id))?;
    let position = room.nearest_free_cell(room.grid().center());

    let mut enemy = Entity::token(EntityKind::Enemy, position)
        .with_name(stats.name.clone())
        .with_stats(stats.hp, stats.ac);
    if !stats.notes.trim().is_empty() {
        enemy = enemy.with_notes(stats.notes.trim());
    }
    state.add_entity(room_id, enemy)
}
