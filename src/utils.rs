use crate::peer::types::ServerConfig;
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

// Функция для добавления схемы протокола к URL ICE сервера, если она отсутствует
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if ["stun:", "stuns:", "turn:", "turns:"]
        .iter()
        .any(|scheme| config.url.starts_with(scheme))
    {
        return config.url.clone();
    }
    let scheme = if config.r#type == "turn" { "turn:" } else { "stun:" };
    format!("{}{}", scheme, config.url)
}
