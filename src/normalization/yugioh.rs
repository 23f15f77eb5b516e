//! YGOPRODeck `cardinfo.php` entries → `yugioh_cards` rows.
use serde::Deserialize;
use serde_json::Value;

use super::{decode, required_text};
use crate::error::NormalizationError;
use crate::model::{CanonicalCard, CardAttributes, CardId, YugiohAttributes};

#[derive(Debug, Deserialize)]
struct YgoCard {
    id: Option<i64>,
    name: Option<String>,
    #[serde(rename = "type")]
    card_type: Option<String>,
    #[serde(rename = "frameType")]
    frame_type: Option<String>,
    desc: Option<String>,
    atk: Option<i64>,
    def: Option<i64>,
    level: Option<i64>,
    race: Option<String>,
    attribute: Option<String>,
    archetype: Option<String>,
    scale: Option<i64>,
    linkval: Option<i64>,
    linkmarkers: Option<Vec<String>>,
    card_sets: Option<Value>,
    card_images: Option<Value>,
    card_prices: Option<Value>,
}

pub fn normalize(raw: &Value) -> Result<CanonicalCard, NormalizationError> {
    let card: YgoCard = decode(raw)?;
    let id = card.id.ok_or(NormalizationError::MissingField("id"))?;
    let name = required_text(card.name, "name")?;

    Ok(CanonicalCard {
        id: CardId::Numeric(id),
        name,
        attributes: CardAttributes::Yugioh(YugiohAttributes {
            card_type: card.card_type,
            frame_type: card.frame_type,
            desc: card.desc,
            atk: card.atk,
            def: card.def,
            level: card.level,
            race: card.race,
            attribute: card.attribute,
            archetype: card.archetype,
            scale: card.scale,
            linkval: card.linkval,
            linkmarkers: card.linkmarkers,
            card_sets: card.card_sets,
            card_images: card.card_images,
            card_prices: card.card_prices,
        }),
    })
}
