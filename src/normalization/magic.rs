//! Scryfall card objects → `cards` rows.
use serde::Deserialize;
use serde_json::Value;

use super::{decode, first_present, is_truthy, required_text};
use crate::error::NormalizationError;
use crate::model::{CanonicalCard, CardAttributes, CardId, MagicAttributes};

// Only the fields we store are modeled; everything else Scryfall sends is ignored.
#[derive(Debug, Deserialize)]
struct ScryfallCard {
    id: Option<String>,
    name: Option<String>,
    set: Option<String>,
    collector_number: Option<String>,
    rarity: Option<String>,
    type_line: Option<String>,
    oracle_text: Option<String>,
    layout: Option<String>,
    // Upstream shape varies (bool today, other encodings in older dumps).
    foil: Option<Value>,
    mana_cost: Option<String>,
    cmc: Option<f64>,
    power: Option<String>,
    toughness: Option<String>,
    colors: Option<Vec<String>>,
    image_uris: Option<ScryfallImages>,
    prices: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ScryfallImages {
    normal: Option<String>,
    large: Option<String>,
    png: Option<String>,
}

pub fn normalize(raw: &Value) -> Result<CanonicalCard, NormalizationError> {
    let card: ScryfallCard = decode(raw)?;
    let id = required_text(card.id, "id")?;
    let name = required_text(card.name, "name")?;

    let image_uri = card
        .image_uris
        .and_then(|i| first_present([i.normal, i.large, i.png]));

    Ok(CanonicalCard {
        id: CardId::Text(id),
        name,
        attributes: CardAttributes::Magic(MagicAttributes {
            set: card.set,
            collector_number: card.collector_number,
            rarity: card.rarity,
            type_line: card.type_line,
            oracle_text: card.oracle_text,
            layout: card.layout,
            foil: is_truthy(card.foil.as_ref()),
            mana_cost: card.mana_cost,
            cmc: card.cmc,
            power: card.power,
            toughness: card.toughness,
            colors: card.colors.unwrap_or_default(),
            image_uri,
            prices: card.prices,
        }),
    })
}
