/// Country prediction for developer profiles.
///
/// Three stages, each tried only when the previous one gave nothing usable:
/// 1. dictionary match on the free-text location (confidence 100),
/// 2. point scoring over email, name, company and repository descriptions,
/// 3. a single AI completion, accepted only as a confident two-letter code.
///
/// Stages 1 and 2 are deterministic. Stage 3 is best-effort.
use crate::ai_client::{nation_messages, parse_response, AiService, DeveloperFacts};
use crate::models::{PredictionResult, RepositoryRecord, UserRecord};
use std::sync::Arc;

/// Heuristic predictions below this confidence are discarded.
pub const MIN_HEURISTIC_CONFIDENCE: f64 = 40.0;

/// Country names. Order breaks ties between equally long matches.
const COUNTRY_KEYWORDS: &[(&str, &str)] = &[
    // Asia
    ("china", "CN"),
    ("中国", "CN"),
    ("japan", "JP"),
    ("日本", "JP"),
    ("korea", "KR"),
    ("韩国", "KR"),
    ("한국", "KR"),
    ("singapore", "SG"),
    ("新加坡", "SG"),
    ("india", "IN"),
    ("thailand", "TH"),
    ("vietnam", "VN"),
    ("malaysia", "MY"),
    ("indonesia", "ID"),
    ("taiwan", "TW"),
    ("hong kong", "HK"),
    // North America
    ("usa", "US"),
    ("united states", "US"),
    ("america", "US"),
    ("canada", "CA"),
    ("mexico", "MX"),
    // Europe
    ("uk", "GB"),
    ("united kingdom", "GB"),
    ("england", "GB"),
    ("scotland", "GB"),
    ("germany", "DE"),
    ("deutschland", "DE"),
    ("france", "FR"),
    ("italy", "IT"),
    ("italia", "IT"),
    ("spain", "ES"),
    ("españa", "ES"),
    ("netherlands", "NL"),
    ("nederland", "NL"),
    ("sweden", "SE"),
    ("sverige", "SE"),
    ("norway", "NO"),
    ("danmark", "DK"),
    ("denmark", "DK"),
    ("finland", "FI"),
    ("switzerland", "CH"),
    ("ireland", "IE"),
    ("poland", "PL"),
    ("russia", "RU"),
    ("россия", "RU"),
    // Oceania
    ("australia", "AU"),
    ("new zealand", "NZ"),
    // South America
    ("brazil", "BR"),
    ("brasil", "BR"),
    ("argentina", "AR"),
    ("chile", "CL"),
    // Africa
    ("south africa", "ZA"),
    ("egypt", "EG"),
    ("nigeria", "NG"),
];

/// Major cities, consulted only when no country name matched.
const CITY_KEYWORDS: &[(&str, &str)] = &[
    ("beijing", "CN"),
    ("shanghai", "CN"),
    ("shenzhen", "CN"),
    ("guangzhou", "CN"),
    ("hangzhou", "CN"),
    ("chengdu", "CN"),
    ("nanjing", "CN"),
    ("wuhan", "CN"),
    ("xian", "CN"),
    ("xi'an", "CN"),
    ("suzhou", "CN"),
    ("北京", "CN"),
    ("上海", "CN"),
    ("深圳", "CN"),
    ("杭州", "CN"),
    ("tokyo", "JP"),
    ("osaka", "JP"),
    ("kyoto", "JP"),
    ("yokohama", "JP"),
    ("sapporo", "JP"),
    ("fukuoka", "JP"),
    ("nagoya", "JP"),
    ("东京", "JP"),
    ("東京", "JP"),
    ("seoul", "KR"),
    ("busan", "KR"),
    ("incheon", "KR"),
    ("new york", "US"),
    ("san francisco", "US"),
    ("seattle", "US"),
    ("boston", "US"),
    ("chicago", "US"),
    ("los angeles", "US"),
    ("san jose", "US"),
    ("austin", "US"),
    ("portland", "US"),
    ("washington", "US"),
    ("london", "GB"),
    ("manchester", "GB"),
    ("cambridge", "GB"),
    ("oxford", "GB"),
    ("edinburgh", "GB"),
    ("glasgow", "GB"),
    ("bristol", "GB"),
    ("berlin", "DE"),
    ("munich", "DE"),
    ("paris", "FR"),
];

/// Username/display-name keywords and the country they point to.
const NAME_KEYWORDS: &[(&str, &str)] = &[
    ("china", "CN"),
    ("cn", "CN"),
    ("jp", "JP"),
    ("kr", "KR"),
    ("sg", "SG"),
];

const COMPANY_KEYWORDS: &[&str] = &["china", "beijing", "shanghai"];

/// Share of repository descriptions written in Han script above which the
/// "many Chinese descriptions" signal fires.
const HAN_DESCRIPTION_RATIO: f64 = 0.3;

fn is_han(c: char) -> bool {
    matches!(c as u32,
        0x3400..=0x4DBF
        | 0x4E00..=0x9FFF
        | 0xF900..=0xFAFF
        | 0x20000..=0x2A6DF
        | 0x2A700..=0x2EBEF
        | 0x30000..=0x3134F)
}

/// True when `s` contains at least one Han character.
pub fn contains_han(s: &str) -> bool {
    s.chars().any(is_han)
}

/// Whole-word search for ASCII keys, plain substring search otherwise.
fn location_contains(haystack: &str, key: &str) -> bool {
    if !key.is_ascii() {
        return haystack.contains(key);
    }
    haystack.match_indices(key).any(|(start, _)| {
        let end = start + key.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Stage 1: country code for a free-text location.
///
/// Country names are tried before city names, so "Paris, Texas, USA" is US.
/// Within each group the longest matching keyword wins; equally long matches
/// go to the keyword listed first.
pub fn extract_nation(location: &str) -> Option<&'static str> {
    let location = location.trim().to_lowercase();
    if location.is_empty() {
        return None;
    }

    longest_match(&location, COUNTRY_KEYWORDS)
        .or_else(|| longest_match(&location, CITY_KEYWORDS))
}

fn longest_match(location: &str, keywords: &[(&str, &'static str)]) -> Option<&'static str> {
    let mut best: Option<(&str, &'static str)> = None;
    for &(key, code) in keywords {
        if !location_contains(location, key) {
            continue;
        }
        match best {
            Some((current, _)) if current.chars().count() >= key.chars().count() => {}
            _ => best = Some((key, code)),
        }
    }
    best.map(|(_, code)| code)
}

/// Stage 2: point scoring over independent profile signals.
///
/// Returns an empty prediction when no signal fired or when two countries
/// share the top score.
pub fn quick_predict(user: &UserRecord, repos: &[RepositoryRecord]) -> PredictionResult {
    let mut points: Vec<(&'static str, f64)> = Vec::new();
    let mut factors: Vec<String> = Vec::new();

    let mut add = |country: &'static str, score: f64, factor: String| {
        match points.iter_mut().find(|(c, _)| *c == country) {
            Some((_, s)) => *s += score,
            None => points.push((country, score)),
        }
        factors.push(factor);
    };

    // Email domain or provider
    if let Some(email) = user.email.as_deref().map(str::to_lowercase) {
        if email.ends_with(".cn") {
            add("CN", 2.0, "email domain (.cn)".to_string());
        } else if email.ends_with(".jp") {
            add("JP", 2.0, "email domain (.jp)".to_string());
        } else if let Some(provider) = ["foxmail.com", "qq.com", "163.com"]
            .iter()
            .find(|p| email.contains(*p))
        {
            add("CN", 1.5, format!("email provider ({})", provider));
        }
    }

    // Username and display name
    let username = user.login.to_lowercase();
    let name = user.name.as_deref().unwrap_or_default().to_lowercase();

    if contains_han(&name) {
        add("CN", 2.0, "Han characters in display name".to_string());
    }
    for &(keyword, country) in NAME_KEYWORDS {
        if username.contains(keyword) || name.contains(keyword) {
            add(country, 1.5, format!("name keyword ({})", keyword));
        }
    }

    // Repository descriptions
    let mut han_descriptions = 0usize;
    for repo in repos {
        let desc = repo.description.as_deref().unwrap_or_default().to_lowercase();
        if contains_han(&desc) {
            han_descriptions += 1;
        }
        if desc.contains("中国") || desc.contains("china") {
            add("CN", 1.0, format!("geographic keyword in {}", repo.name));
        }
    }
    if !repos.is_empty() && han_descriptions as f64 / repos.len() as f64 > HAN_DESCRIPTION_RATIO {
        add("CN", 2.0, "mostly Chinese repository descriptions".to_string());
    }

    // Company
    if let Some(company) = user.company.as_deref().filter(|c| !c.trim().is_empty()) {
        let lower = company.to_lowercase();
        if contains_han(company) || COMPANY_KEYWORDS.iter().any(|k| lower.contains(k)) {
            add("CN", 1.5, "company".to_string());
        }
    }

    let Some(max_score) = points.iter().map(|(_, s)| *s).reduce(f64::max) else {
        return PredictionResult::none();
    };
    let leaders: Vec<&str> = points
        .iter()
        .filter(|(_, s)| *s == max_score)
        .map(|(c, _)| *c)
        .collect();
    if max_score <= 0.0 || leaders.len() != 1 {
        return PredictionResult::none();
    }

    PredictionResult {
        nation: leaders[0].to_string(),
        confidence: quick_confidence(max_score, factors.len()),
        factors,
    }
}

/// `0.3 + min(score/5, 0.4) + min(factors/3, 0.3)`, capped at 1, as a percentage.
pub fn quick_confidence(max_score: f64, factor_count: usize) -> f64 {
    let base = 0.3;
    let score = (max_score / 5.0).clamp(0.0, 0.4);
    let factors = (factor_count as f64 / 3.0).min(0.3);
    (base + score + factors).min(1.0) * 100.0
}

/// Runs the prediction stages in order.
#[derive(Clone, Default)]
pub struct NationPredictor {
    ai: Option<Arc<dyn AiService>>,
}

impl NationPredictor {
    pub fn new(ai: Option<Arc<dyn AiService>>) -> Self {
        Self { ai }
    }

    /// Never fails: an unusable answer from every stage is an empty prediction.
    pub async fn predict(
        &self,
        user: &UserRecord,
        repos: &[RepositoryRecord],
        facts: &DeveloperFacts,
    ) -> PredictionResult {
        if let Some(code) = user.location.as_deref().and_then(extract_nation) {
            return PredictionResult {
                nation: code.to_string(),
                confidence: 100.0,
                factors: vec!["location".to_string()],
            };
        }

        let quick = quick_predict(user, repos);
        if !quick.is_empty() && quick.confidence >= MIN_HEURISTIC_CONFIDENCE {
            return quick;
        }

        self.predict_with_ai(facts).await
    }

    async fn predict_with_ai(&self, facts: &DeveloperFacts) -> PredictionResult {
        let Some(ai) = &self.ai else {
            return PredictionResult::none();
        };

        tracing::debug!("Local signals inconclusive for {}, asking AI", facts.username);

        let text = match ai.complete(nation_messages(facts)).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("AI nation prediction failed for {}: {}", facts.username, e);
                return PredictionResult::none();
            }
        };

        match parse_response(&text).accepted_nation() {
            Some((nation, confidence)) => {
                tracing::info!(
                    "AI predicted {} for {} ({:.0}%)",
                    nation,
                    facts.username,
                    confidence
                );
                PredictionResult {
                    nation,
                    confidence,
                    factors: vec!["ai".to_string()],
                }
            }
            None => {
                tracing::debug!("AI gave no usable nation for {}", facts.username);
                PredictionResult::none()
            }
        }
    }
}
