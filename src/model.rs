use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The three catalogs we mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Game {
    #[value(alias = "mtg")]
    Magic,
    Pokemon,
    #[value(alias = "ygo")]
    Yugioh,
}

impl Game {
    pub const ALL: [Game; 3] = [Game::Magic, Game::Pokemon, Game::Yugioh];

    pub fn as_str(&self) -> &'static str {
        match self {
            Game::Magic => "magic",
            Game::Pokemon => "pokemon",
            Game::Yugioh => "yugioh",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Game::Magic => "Magic: The Gathering",
            Game::Pokemon => "Pokémon",
            Game::Yugioh => "Yu-Gi-Oh!",
        }
    }

    /// Parse a user-supplied identifier into this game's native id type.
    pub fn parse_id(&self, raw: &str) -> Result<CardId, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("card id must not be empty".to_string());
        }
        match self {
            Game::Yugioh => raw
                .parse::<i64>()
                .map(CardId::Numeric)
                .map_err(|_| format!("Yu-Gi-Oh! card ids are integers, got `{raw}`")),
            Game::Magic | Game::Pokemon => Ok(CardId::Text(raw.to_string())),
        }
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Game {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "magic" | "mtg" => Ok(Game::Magic),
            "pokemon" => Ok(Game::Pokemon),
            "yugioh" | "ygo" => Ok(Game::Yugioh),
            other => Err(format!("unknown game `{other}`")),
        }
    }
}

/// Stable upstream identifier; the upsert key of every table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CardId {
    Numeric(i64),
    Text(String),
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardId::Numeric(n) => write!(f, "{n}"),
            CardId::Text(s) => f.write_str(s),
        }
    }
}

impl From<&CardId> for Value {
    fn from(id: &CardId) -> Self {
        match id {
            CardId::Numeric(n) => Value::from(*n),
            CardId::Text(s) => Value::String(s.clone()),
        }
    }
}

pub const MAGIC_COLUMNS: &[&str] = &[
    "id",
    "name",
    "set",
    "collector_number",
    "rarity",
    "type_line",
    "oracle_text",
    "layout",
    "foil",
    "mana_cost",
    "cmc",
    "power",
    "toughness",
    "colors",
    "image_uri",
    "prices",
    "last_updated",
];

pub const POKEMON_COLUMNS: &[&str] = &[
    "id",
    "name",
    "supertype",
    "subtypes",
    "level",
    "hp",
    "types",
    "evolves_from",
    "rules",
    "abilities",
    "attacks",
    "weaknesses",
    "resistances",
    "retreat_cost",
    "converted_retreat_cost",
    "set_name",
    "set_series",
    "set_code",
    "set_release_date",
    "rarity",
    "artist",
    "image_small",
    "image_large",
    "prices",
    "last_updated",
];

pub const YUGIOH_COLUMNS: &[&str] = &[
    "id",
    "name",
    "type",
    "frame_type",
    "desc",
    "atk",
    "def",
    "level",
    "race",
    "attribute",
    "archetype",
    "scale",
    "linkval",
    "linkmarkers",
    "card_sets",
    "card_images",
    "card_prices",
    "last_updated",
];

// Option fields serialize as explicit nulls so every row carries the full column set.

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MagicAttributes {
    pub set: Option<String>,
    pub collector_number: Option<String>,
    pub rarity: Option<String>,
    pub type_line: Option<String>,
    pub oracle_text: Option<String>,
    pub layout: Option<String>,
    pub foil: bool,
    pub mana_cost: Option<String>,
    pub cmc: Option<f64>,
    pub power: Option<String>,
    pub toughness: Option<String>,
    pub colors: Vec<String>,
    pub image_uri: Option<String>,
    pub prices: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PokemonAttributes {
    pub supertype: Option<String>,
    pub subtypes: Option<Vec<String>>,
    pub level: Option<String>,
    pub hp: Option<String>,
    pub types: Option<Vec<String>>,
    pub evolves_from: Option<String>,
    pub rules: Option<Vec<String>>,
    pub abilities: Option<Value>,
    pub attacks: Option<Value>,
    pub weaknesses: Option<Value>,
    pub resistances: Option<Value>,
    pub retreat_cost: u32,
    pub converted_retreat_cost: Option<i64>,
    pub set_name: Option<String>,
    pub set_series: Option<String>,
    pub set_code: Option<String>,
    pub set_release_date: Option<String>,
    pub rarity: Option<String>,
    pub artist: Option<String>,
    pub image_small: Option<String>,
    pub image_large: Option<String>,
    pub prices: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YugiohAttributes {
    #[serde(rename = "type")]
    pub card_type: Option<String>,
    pub frame_type: Option<String>,
    pub desc: Option<String>,
    pub atk: Option<i64>,
    pub def: Option<i64>,
    pub level: Option<i64>,
    pub race: Option<String>,
    pub attribute: Option<String>,
    pub archetype: Option<String>,
    pub scale: Option<i64>,
    pub linkval: Option<i64>,
    pub linkmarkers: Option<Vec<String>>,
    pub card_sets: Option<Value>,
    pub card_images: Option<Value>,
    pub card_prices: Option<Value>,
}

/// Game-specific payload of a canonical card.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CardAttributes {
    Magic(MagicAttributes),
    Pokemon(PokemonAttributes),
    Yugioh(YugiohAttributes),
}

/// Normalized, storage-ready card. `last_updated` is added by the store at write time.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalCard {
    pub id: CardId,
    pub name: String,
    pub attributes: CardAttributes,
}

impl CanonicalCard {
    pub fn game(&self) -> Game {
        match self.attributes {
            CardAttributes::Magic(_) => Game::Magic,
            CardAttributes::Pokemon(_) => Game::Pokemon,
            CardAttributes::Yugioh(_) => Game::Yugioh,
        }
    }

    /// Stored column names for this card's table, `last_updated` included.
    pub fn columns(&self) -> &'static [&'static str] {
        columns_for(self.game())
    }

    /// Flatten into the full stored row, stamped with `last_updated`.
    pub fn to_row(&self, last_updated: DateTime<Utc>) -> Result<Map<String, Value>, serde_json::Error> {
        let mut row = Map::new();
        row.insert("id".into(), Value::from(&self.id));
        row.insert("name".into(), Value::String(self.name.clone()));
        if let Value::Object(attrs) = serde_json::to_value(&self.attributes)? {
            row.extend(attrs);
        }
        row.insert("last_updated".into(), Value::String(format_timestamp(last_updated)));
        Ok(row)
    }
}

pub fn columns_for(game: Game) -> &'static [&'static str] {
    match game {
        Game::Magic => MAGIC_COLUMNS,
        Game::Pokemon => POKEMON_COLUMNS,
        Game::Yugioh => YUGIOH_COLUMNS,
    }
}

/// RFC 3339 with microseconds and a `Z` suffix, the precision Postgres keeps.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
