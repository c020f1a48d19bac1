//! Fixed ISO-code to country-name table used for identifier derivation.
//!
//! Besides ISO 3166 alpha-2 codes the provider uses a few multi-country
//! region codes (`EU`, `EUS`, `EUUS`).

/// Look up the slug-form name for a country/region code.
///
/// The code is matched case-insensitively after trimming.
pub fn country_name(code: &str) -> Option<&'static str> {
    let code = code.trim().to_ascii_uppercase();
    let name = match code.as_str() {
        "GR" => "greece",
        "AL" => "albania",
        "DE" => "germany",
        "IT" => "italy",
        "FR" => "france",
        "ES" => "spain",
        "PT" => "portugal",
        "NL" => "netherlands",
        "BE" => "belgium",
        "AT" => "austria",
        "CH" => "switzerland",
        "US" => "united-states",
        "CA" => "canada",
        "UK" | "GB" => "united-kingdom",
        "IE" => "ireland",
        "NO" => "norway",
        "SE" => "sweden",
        "DK" => "denmark",
        "FI" => "finland",
        "IS" => "iceland",
        "PL" => "poland",
        "CZ" => "czech-republic",
        "HU" => "hungary",
        "RO" => "romania",
        "BG" => "bulgaria",
        "HR" => "croatia",
        "SI" => "slovenia",
        "SK" => "slovakia",
        "LT" => "lithuania",
        "LV" => "latvia",
        "EE" => "estonia",
        "TR" => "turkey",
        "AE" => "united-arab-emirates",
        "SA" => "saudi-arabia",
        "EG" => "egypt",
        "MA" => "morocco",
        "ZA" => "south-africa",
        "KE" => "kenya",
        "NG" => "nigeria",
        "JP" => "japan",
        "KR" => "south-korea",
        "CN" => "china",
        "IN" => "india",
        "TH" => "thailand",
        "VN" => "vietnam",
        "ID" => "indonesia",
        "MY" => "malaysia",
        "SG" => "singapore",
        "PH" => "philippines",
        "AU" => "australia",
        "NZ" => "new-zealand",
        "BR" => "brazil",
        "AR" => "argentina",
        "CL" => "chile",
        "CO" => "colombia",
        "MX" => "mexico",
        "EU" => "europe",
        "EUS" => "europe-sprint",
        "EUUS" => "europe-us",
        _ => return None,
    };
    Some(name)
}

/// Canonical storage form of a country code: trimmed, upper-case.
pub fn normalize_country_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_iso_and_region_codes() {
        assert_eq!(country_name("de"), Some("germany"));
        assert_eq!(country_name(" GB "), Some("united-kingdom"));
        assert_eq!(country_name("UK"), Some("united-kingdom"));
        assert_eq!(country_name("EUUS"), Some("europe-us"));
    }

    #[test]
    fn unknown_codes_are_not_mapped() {
        assert_eq!(country_name("XX"), None);
        assert_eq!(country_name(""), None);
    }
}
