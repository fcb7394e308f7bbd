//! Itinerary generation from a structured form or a free-text request.
//!
//! Neither path uses retrieval: the request is turned into a single user
//! prompt and sent to the LLM. Structured requests are memoized for the
//! life of the process, so resubmitting the same form costs nothing.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use travel_guide_core::prompt::Prompt;
use travel_guide_core::retry::RetryPolicy;

use crate::error::ItineraryError;
use crate::llm::{complete_with_retry, LlmProvider};

pub const INTEREST_OPTIONS: &[&str] = &[
    "Culture and history",
    "Food and drinks",
    "Nature and adventure",
    "Shopping",
    "Nightlife",
    "Art and museums",
    "Relaxation",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TravelPace {
    #[default]
    Relaxed,
    Moderate,
    Intense,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Companions {
    #[default]
    Solo,
    Partner,
    Friends,
    Family,
    Group,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    #[default]
    Public,
    Walking,
    Taxi,
    RentalCar,
    Bicycle,
}

impl fmt::Display for TravelPace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TravelPace::Relaxed => "Relaxed",
            TravelPace::Moderate => "Moderate",
            TravelPace::Intense => "Intense",
        })
    }
}

impl fmt::Display for Companions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Companions::Solo => "Solo",
            Companions::Partner => "Partner",
            Companions::Friends => "Friends",
            Companions::Family => "Family",
            Companions::Group => "Group",
        })
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transport::Public => "Public",
            Transport::Walking => "Walking",
            Transport::Taxi => "Taxi",
            Transport::RentalCar => "Rental car",
            Transport::Bicycle => "Bicycle",
        })
    }
}

/// The guided-form trip description.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TripRequest {
    #[serde(default)]
    pub city: String,
    #[serde(default = "default_days")]
    pub days: u32,
    #[serde(default)]
    pub month: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub budget_usd: u32,
    #[serde(default = "default_interests")]
    pub interests: Vec<String>,
    #[serde(default)]
    pub pace: TravelPace,
    #[serde(default)]
    pub companions: Companions,
    #[serde(default)]
    pub transport: Transport,
}

fn default_days() -> u32 {
    1
}

fn default_interests() -> Vec<String> {
    vec![INTEREST_OPTIONS[0].to_string()]
}

impl Default for TripRequest {
    fn default() -> Self {
        Self {
            city: String::new(),
            days: default_days(),
            month: String::new(),
            language: String::new(),
            budget_usd: 0,
            interests: default_interests(),
            pace: TravelPace::default(),
            companions: Companions::default(),
            transport: Transport::default(),
        }
    }
}

impl TripRequest {
    /// City, month, and language must be non-blank; a trip lasts at least a day.
    pub fn validate(&self) -> Result<(), ItineraryError> {
        let missing: Vec<&'static str> = [
            ("city", &self.city),
            ("month", &self.month),
            ("language", &self.language),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(ItineraryError::MissingFields(missing));
        }
        if self.days == 0 {
            return Err(ItineraryError::Invalid("days must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn to_prompt(&self) -> Prompt {
        let interests = if self.interests.is_empty() {
            "No particular preference".to_string()
        } else {
            self.interests.join(", ")
        };
        Prompt::user_only(format!(
            "Welcome to the {city} travel guide for your {days}-day trip in {month}!\n\
             Based on your preferences:\n\
             - Interests: {interests}\n\
             - Travel Pace: {pace}\n\
             - Traveling With: {companions}\n\
             - Preferred Transport: {transport}\n\n\
             1. Must-visit attractions.\n\
             2. Local cuisine recommendations.\n\
             3. Useful phrases in {language}.\n\
             4. Budget tips to stay within ${budget}.\n\n\
             Enjoy your trip!",
            city = self.city.trim(),
            days = self.days,
            month = self.month.trim(),
            interests = interests,
            pace = self.pace,
            companions = self.companions,
            transport = self.transport,
            language = self.language.trim(),
            budget = self.budget_usd,
        ))
    }
}

/// Prompt for a one-sentence trip description such as
/// "4 days in Lisbon in May on $800, I love seafood".
pub fn free_form_prompt(request: &str) -> Prompt {
    Prompt::user_only(format!(
        "You are an expert travel assistant. A user says: \"{}\".\n\
         Extract details (city, duration, month, budget, interests) from that sentence \
         and generate a clear day-by-day itinerary including:\n\
         - Top attractions\n\
         - Local food tips with approximate costs\n\
         - Useful local phrases\n\
         - Budget breakdown staying within their budget.\n\n\
         If you don't know which city that is, say you've never heard of it.\n\
         Enjoy your trip!",
        request.trim()
    ))
}

pub struct ItineraryGenerator {
    llm: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    /// Structured requests only; free-form requests always regenerate.
    cache: Mutex<HashMap<TripRequest, String>>,
}

impl ItineraryGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, retry: RetryPolicy) -> Self {
        Self {
            llm,
            retry,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn generate_structured(&self, request: &TripRequest) -> Result<String, ItineraryError> {
        request.validate()?;
        let hit = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(request)
            .cloned();
        if let Some(hit) = hit {
            debug!(city = %request.city, "itinerary cache hit");
            return Ok(hit);
        }

        info!(city = %request.city, days = request.days, "generating itinerary");
        let text = complete_with_retry(self.llm.as_ref(), &self.retry, &request.to_prompt()).await?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request.clone(), text.clone());
        Ok(text)
    }

    pub async fn generate_free_form(&self, request: &str) -> Result<String, ItineraryError> {
        if request.trim().is_empty() {
            return Err(ItineraryError::Invalid(
                "travel request must not be empty".to_string(),
            ));
        }

        info!("generating free-form itinerary");
        Ok(complete_with_retry(self.llm.as_ref(), &self.retry, &free_form_prompt(request)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use travel_guide_core::retry::ProviderError;

    struct CountingLlm {
        calls: AtomicUsize,
        throttle_first: usize,
    }

    #[async_trait]
    impl LlmProvider for CountingLlm {
        fn name(&self) -> &str {
            "counting"
        }
        fn model_name(&self) -> &str {
            "counting"
        }
        async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.throttle_first {
                return Err(ProviderError::RateLimited("429".into()));
            }
            Ok(format!("itinerary for: {}", prompt.question().unwrap_or_default()))
        }
    }

    fn generator(throttle_first: usize) -> (Arc<CountingLlm>, ItineraryGenerator) {
        let llm = Arc::new(CountingLlm {
            calls: AtomicUsize::new(0),
            throttle_first,
        });
        let gen = ItineraryGenerator::new(llm.clone(), RetryPolicy::new(3, Duration::from_millis(1)));
        (llm, gen)
    }

    fn kyoto() -> TripRequest {
        TripRequest {
            city: "Kyoto".into(),
            days: 3,
            month: "April".into(),
            language: "Japanese".into(),
            budget_usd: 1200,
            interests: vec!["Food and drinks".into(), "Art and museums".into()],
            pace: TravelPace::Moderate,
            companions: Companions::Partner,
            transport: Transport::RentalCar,
        }
    }

    #[test]
    fn test_missing_fields_listed() {
        let req = TripRequest {
            city: "  ".into(),
            ..Default::default()
        };
        assert_eq!(
            req.validate(),
            Err(ItineraryError::MissingFields(vec!["city", "month", "language"]))
        );
    }

    #[test]
    fn test_prompt_mentions_every_preference() {
        let prompt = kyoto().to_prompt();
        let text = prompt.question().unwrap();
        for needle in [
            "Kyoto",
            "3-day trip in April",
            "Food and drinks, Art and museums",
            "Travel Pace: Moderate",
            "Traveling With: Partner",
            "Preferred Transport: Rental car",
            "Useful phrases in Japanese",
            "$1200",
        ] {
            assert!(text.contains(needle), "missing {:?}", needle);
        }
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let req: TripRequest = serde_json::from_str(
            r#"{"city":"Rome","month":"May","language":"Italian","transport":"rental-car"}"#,
        )
        .unwrap();
        assert_eq!(req.days, 1);
        assert_eq!(req.interests, vec!["Culture and history".to_string()]);
        assert_eq!(req.transport, Transport::RentalCar);
        assert_eq!(req.pace, TravelPace::Relaxed);
    }

    #[tokio::test]
    async fn test_structured_is_cached() {
        let (llm, gen) = generator(0);
        let first = gen.generate_structured(&kyoto()).await.unwrap();
        let second = gen.generate_structured(&kyoto()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_free_form_regenerates_every_time() {
        let (llm, gen) = generator(0);
        gen.generate_free_form("2 days in Porto").await.unwrap();
        gen.generate_free_form("2 days in Porto").await.unwrap();
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_request_never_calls_llm() {
        let (llm, gen) = generator(0);
        assert!(gen.generate_structured(&TripRequest::default()).await.is_err());
        assert!(gen.generate_free_form("   ").await.is_err());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_retried_then_surfaced() {
        let (llm, gen) = generator(2);
        assert!(gen.generate_free_form("3 days in Oslo").await.is_ok());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);

        let (llm, gen) = generator(10);
        let err = gen.generate_free_form("3 days in Oslo").await.unwrap_err();
        assert!(matches!(err, ItineraryError::RateLimited(_)));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_free_form_prompt_quotes_request() {
        let (_, gen) = generator(0);
        let text = gen.generate_free_form("a week in Lisbon in May").await.unwrap();
        assert!(text.contains("A user says: \"a week in Lisbon in May\""));
    }
}
