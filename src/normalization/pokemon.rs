//! Pokémon TCG API v2 card objects → `pokemon_cards` rows.
use serde::Deserialize;
use serde_json::Value;

use super::{decode, required_text};
use crate::error::NormalizationError;
use crate::model::{CanonicalCard, CardAttributes, CardId, PokemonAttributes};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TcgCard {
    id: Option<String>,
    name: Option<String>,
    supertype: Option<String>,
    subtypes: Option<Vec<String>>,
    level: Option<String>,
    hp: Option<String>,
    types: Option<Vec<String>>,
    evolves_from: Option<String>,
    rules: Option<Vec<String>>,
    abilities: Option<Value>,
    attacks: Option<Value>,
    weaknesses: Option<Value>,
    resistances: Option<Value>,
    retreat_cost: Option<Vec<Value>>,
    converted_retreat_cost: Option<i64>,
    set: Option<TcgSet>,
    rarity: Option<String>,
    artist: Option<String>,
    images: Option<TcgImages>,
    tcgplayer: Option<TcgPlayer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TcgSet {
    id: Option<String>,
    name: Option<String>,
    series: Option<String>,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TcgImages {
    small: Option<String>,
    large: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TcgPlayer {
    prices: Option<Value>,
}

pub fn normalize(raw: &Value) -> Result<CanonicalCard, NormalizationError> {
    let card: TcgCard = decode(raw)?;
    let id = required_text(card.id, "id")?;
    let name = required_text(card.name, "name")?;

    // Stored as a count, not the energy list itself.
    let retreat_cost = card.retreat_cost.map(|c| c.len() as u32).unwrap_or(0);

    let (set_code, set_name, set_series, set_release_date) = match card.set {
        Some(s) => (s.id, s.name, s.series, s.release_date),
        None => (None, None, None, None),
    };
    let (image_small, image_large) = match card.images {
        Some(i) => (i.small, i.large),
        None => (None, None),
    };

    Ok(CanonicalCard {
        id: CardId::Text(id),
        name,
        attributes: CardAttributes::Pokemon(PokemonAttributes {
            supertype: card.supertype,
            subtypes: card.subtypes,
            level: card.level,
            hp: card.hp,
            types: card.types,
            evolves_from: card.evolves_from,
            rules: card.rules,
            abilities: card.abilities,
            attacks: card.attacks,
            weaknesses: card.weaknesses,
            resistances: card.resistances,
            retreat_cost,
            converted_retreat_cost: card.converted_retreat_cost,
            set_name,
            set_series,
            set_code,
            set_release_date,
            rarity: card.rarity,
            artist: card.artist,
            image_small,
            image_large,
            prices: card.tcgplayer.and_then(|t| t.prices),
        }),
    })
}
