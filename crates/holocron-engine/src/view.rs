//! Fully resolved entities returned by mutations

use crate::resolver::Resolver;
use holocron_core::{
    Character, Entity, EntityId, EntityKind, Error, Film, KillEvent, Planet, Record, Relationship,
    Result, Starship,
};
use holocron_storage::StorageBackend;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterView {
    #[serde(flatten)]
    pub character: Character,
    pub homeworld: Option<Planet>,
    pub starships: Vec<Starship>,
    pub films: Vec<Film>,
    pub kill_count: u64,
    pub death: Option<KillEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StarshipView {
    #[serde(flatten)]
    pub starship: Starship,
    pub pilots: Vec<Character>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanetView {
    #[serde(flatten)]
    pub planet: Planet,
    pub residents: Vec<Character>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KillView {
    #[serde(flatten)]
    pub kill: KillEvent,
    pub killer: Character,
    pub victim: Character,
}

fn records<R: Record>(entities: Vec<Entity>) -> Vec<R> {
    entities.into_iter().filter_map(Entity::into_record).collect()
}

fn record<R: Record>(entity: Option<Entity>) -> Option<R> {
    entity.and_then(Entity::into_record)
}

fn missing(kind: EntityKind, id: &EntityId) -> Error {
    Error::not_found(kind, id.clone())
}

// Every view resolves its fields in one fan-out so the relationships of a
// view cost one batch each.

pub(crate) async fn character_view<S: StorageBackend + ?Sized + 'static>(
    resolver: &Resolver<S>,
    id: &EntityId,
) -> Result<CharacterView> {
    let ctx = resolver.context();
    let character = ctx.entities(EntityKind::Character).load(id.clone());
    let homeworld = resolver.prepare_relationship(&ctx, Relationship::CharacterHomeworld, id);
    let starships = resolver.prepare_relationship(&ctx, Relationship::CharacterStarships, id);
    let films = resolver.prepare_relationship(&ctx, Relationship::CharacterFilms, id);
    let kill_count = resolver.prepare_relationship(&ctx, Relationship::CharacterKillCount, id);
    let death = resolver.prepare_relationship(&ctx, Relationship::CharacterDeath, id);

    let character: Character = record(character.await?.first().cloned())
        .ok_or_else(|| missing(EntityKind::Character, id))?;
    let (homeworld, starships, films, kill_count, death) = futures::try_join!(
        homeworld.resolve(),
        starships.resolve(),
        films.resolve(),
        kill_count.resolve(),
        death.resolve(),
    )?;

    Ok(CharacterView {
        character,
        homeworld: record(homeworld.into_one()),
        starships: records(starships.into_many()),
        films: records(films.into_many()),
        kill_count: kill_count.count(),
        death: record(death.into_one()),
    })
}

pub(crate) async fn starship_view<S: StorageBackend + ?Sized + 'static>(
    resolver: &Resolver<S>,
    id: &EntityId,
) -> Result<StarshipView> {
    let ctx = resolver.context();
    let starship = ctx.entities(EntityKind::Starship).load(id.clone());
    let pilots = resolver.prepare_relationship(&ctx, Relationship::StarshipPilots, id);

    let starship: Starship = record(starship.await?.first().cloned())
        .ok_or_else(|| missing(EntityKind::Starship, id))?;
    Ok(StarshipView {
        starship,
        pilots: records(pilots.resolve().await?.into_many()),
    })
}

pub(crate) async fn planet_view<S: StorageBackend + ?Sized + 'static>(
    resolver: &Resolver<S>,
    id: &EntityId,
) -> Result<PlanetView> {
    let ctx = resolver.context();
    let planet = ctx.entities(EntityKind::Planet).load(id.clone());
    let residents = resolver.prepare_relationship(&ctx, Relationship::PlanetResidents, id);

    let planet: Planet =
        record(planet.await?.first().cloned()).ok_or_else(|| missing(EntityKind::Planet, id))?;
    Ok(PlanetView {
        planet,
        residents: records(residents.resolve().await?.into_many()),
    })
}

pub(crate) async fn kill_view<S: StorageBackend + ?Sized + 'static>(
    resolver: &Resolver<S>,
    id: &EntityId,
) -> Result<KillView> {
    let ctx = resolver.context();
    let kill = ctx.entities(EntityKind::Kill).load(id.clone());
    let killer = resolver.prepare_relationship(&ctx, Relationship::KillKiller, id);
    let victim = resolver.prepare_relationship(&ctx, Relationship::KillVictim, id);

    let kill: KillEvent =
        record(kill.await?.first().cloned()).ok_or_else(|| missing(EntityKind::Kill, id))?;
    let (killer, victim) = futures::try_join!(killer.resolve(), victim.resolve())?;

    Ok(KillView {
        killer: record(killer.into_one())
            .ok_or_else(|| missing(EntityKind::Character, &kill.killer_id))?,
        victim: record(victim.into_one())
            .ok_or_else(|| missing(EntityKind::Character, &kill.victim_id))?,
        kill,
    })
}
