//! Deterministic keyword-based analyzer.
//!
//! Used when no remote provider is configured and whenever the remote provider fails.

use async_trait::async_trait;
use std::collections::HashMap;

use super::{
    ActionableInsight, AiError, AiProvider, EmailAnalysis, EmailCategory, EmailContent,
    ExecutiveMetrics, ExecutiveNarrative, InsightStats, Priority, Sentiment, TrendNarrative,
    TrendSummary,
};

const SUMMARY_MAX_CHARS: usize = 200;
const HEURISTIC_CONFIDENCE: f64 = 0.5;
const BASE_IMPORTANCE: f64 = 0.3;

const CATEGORY_KEYWORDS: &[(EmailCategory, &[&str])] = &[
    (
        EmailCategory::Urgent,
        &["urgent", "asap", "immediately", "emergency", "critical", "action required"],
    ),
    (
        EmailCategory::Work,
        &[
            "meeting", "project", "deadline", "report", "review", "invoice", "client",
            "proposal", "agenda", "quarterly", "contract",
        ],
    ),
    (
        EmailCategory::Promotional,
        &[
            "sale", "discount", "% off", "offer", "deal", "coupon", "limited time",
            "buy now", "free shipping",
        ],
    ),
    (
        EmailCategory::Newsletter,
        &["newsletter", "unsubscribe", "weekly digest", "this week in", "edition", "read more"],
    ),
    (
        EmailCategory::Notification,
        &[
            "notification", "alert", "your account", "password", "verify", "receipt",
            "has shipped", "order confirmation",
        ],
    ),
    (
        EmailCategory::Social,
        &[
            "liked your", "commented", "followed you", "friend request", "mentioned you",
            "new connection", "linkedin", "facebook",
        ],
    ),
    (
        EmailCategory::Support,
        &["ticket", "support", "help desk", "case #", "troubleshoot", "customer service"],
    ),
    (
        EmailCategory::Spam,
        &[
            "winner", "lottery", "claim your prize", "wire transfer", "inheritance",
            "crypto giveaway", "act now",
        ],
    ),
    (
        EmailCategory::Personal,
        &["family", "dinner", "weekend", "birthday", "vacation", "see you", "love you"],
    ),
];

const URGENCY_TERMS: &[&str] = &["urgent", "asap", "immediately", "emergency", "critical", "deadline", "today"];

const REQUEST_TERMS: &[&str] = &["please", "could you", "can you", "would you", "let me know", "rsvp"];

const POSITIVE_WORDS: &[&str] = &[
    "thanks", "thank", "great", "excellent", "appreciate", "happy", "glad", "pleased",
    "wonderful", "congratulations", "awesome", "success", "good", "love", "perfect",
];

const NEGATIVE_WORDS: &[&str] = &[
    "problem", "unfortunately", "disappointed", "angry", "complaint", "fail", "failed",
    "error", "wrong", "delay", "delayed", "sorry", "cancel", "refund", "broken", "bad",
    "poor", "issue", "overdue",
];

const STOPWORDS: &[&str] = &[
    "this", "that", "with", "from", "have", "will", "your", "about", "there", "their",
    "would", "could", "should", "been", "were", "what", "when", "which", "them", "they",
    "here", "just", "into", "more", "some", "also", "than", "then", "only", "over", "please",
    "thanks", "regards", "hello", "dear", "best", "today",
];

/// Keyword rules. Stateless and infallible.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAnalyzer;

impl HeuristicAnalyzer {
    pub fn analyze(&self, content: &EmailContent) -> EmailAnalysis {
        let text = content.searchable_text();
        let words = tokenize(&text);

        let category = categorize(&text, &content.sender);
        let sentiment_score = sentiment_score(&words);

        let urgent = contains_any(&text, URGENCY_TERMS);
        let request = contains_any(&text, REQUEST_TERMS) || text.contains('?');

        let mut importance = BASE_IMPORTANCE;
        if urgent {
            importance += 0.3;
        }
        if content.has_attachments {
            importance += 0.1;
        }
        if request {
            importance += 0.15;
        }
        match category {
            EmailCategory::Work => importance += 0.15,
            EmailCategory::Urgent => importance += 0.2,
            EmailCategory::Promotional | EmailCategory::Newsletter => importance -= 0.2,
            EmailCategory::Spam => importance -= 0.3,
            _ => {}
        }
        let importance_score = importance.clamp(0.0, 1.0);

        let requires_action = !category.is_bulk()
            && category != EmailCategory::Spam
            && (urgent || request || text.contains("action required"));

        let action_type = requires_action.then(|| {
            if text.contains("meeting") || text.contains("schedule") || text.contains("rsvp") {
                "schedule"
            } else if content.has_attachments || text.contains("review") {
                "review"
            } else if text.contains('?') {
                "reply"
            } else {
                "follow_up"
            }
            .to_string()
        });

        EmailAnalysis {
            category,
            priority: Priority::from_importance(importance_score),
            sentiment: Sentiment::from_score(sentiment_score),
            sentiment_score,
            importance_score,
            key_topics: key_topics(&words, 3),
            requires_action,
            action_type,
            summary: summarize(content),
            confidence: HEURISTIC_CONFIDENCE,
        }
    }

    /// Pick the custom category whose name occurs most often in the email, falling
    /// back to the built-in category when it is one of the choices.
    pub fn classify_into(&self, content: &EmailContent, categories: &[String]) -> String {
        let text = content.searchable_text();

        let best = categories
            .iter()
            .map(|c| (c, text.matches(&c.trim().to_lowercase()).count()))
            .filter(|(c, hits)| *hits > 0 && !c.trim().is_empty())
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)));

        if let Some((category, _)) = best {
            return category.clone();
        }

        let builtin = categorize(&text, &content.sender);
        categories
            .iter()
            .find(|c| c.trim().eq_ignore_ascii_case(builtin.as_str()))
            .cloned()
            .unwrap_or_else(|| builtin.as_str().to_string())
    }

    pub fn insights_for(&self, stats: &InsightStats) -> Vec<ActionableInsight> {
        let mut insights = Vec::new();
        let total = stats.total_emails.max(1) as f64;

        if stats.action_required > 0 {
            let share = stats.action_required as f64 / total;
            insights.push(ActionableInsight {
                insight_type: "priority".into(),
                title: "Emails waiting on you".into(),
                description: format!(
                    "{} of {} emails ({:.0}%) need a response or follow-up.",
                    stats.action_required,
                    stats.total_emails,
                    share * 100.0
                ),
                impact_level: if share > 0.1 { "high" } else { "medium" }.into(),
                action_items: vec![
                    "Block a daily slot to clear action items".into(),
                    "Reply to urgent threads first".into(),
                ],
                estimated_time_saved: 0,
            });
        }

        let bulk: i64 = ["promotional", "newsletter"]
            .iter()
            .filter_map(|c| stats.category_distribution.get(*c))
            .sum();
        if bulk as f64 / total > 0.3 {
            insights.push(ActionableInsight {
                insight_type: "productivity".into(),
                title: "Inbox clutter from bulk mail".into(),
                description: format!(
                    "{bulk} promotional and newsletter emails make up {:.0}% of your inbox.",
                    bulk as f64 / total * 100.0
                ),
                impact_level: "medium".into(),
                action_items: vec![
                    "Unsubscribe from senders you never open".into(),
                    "Filter newsletters into a reading folder".into(),
                ],
                estimated_time_saved: bulk / 2,
            });
        }

        if stats.avg_sentiment < -0.2 {
            insights.push(ActionableInsight {
                insight_type: "communication".into(),
                title: "Negative tone detected".into(),
                description: format!(
                    "Average sentiment over the last {} days is {:.2}.",
                    stats.period_days, stats.avg_sentiment
                ),
                impact_level: "medium".into(),
                action_items: vec!["Review recent negative threads for open problems".into()],
                estimated_time_saved: 0,
            });
        }

        if let Some(top) = stats.top_senders.first()
            && top.count as f64 / total > 0.2
        {
            insights.push(ActionableInsight {
                insight_type: "time_management".into(),
                title: "One sender dominates your inbox".into(),
                description: format!(
                    "{} sent {} of your {} emails.",
                    top.sender_email, top.count, stats.total_emails
                ),
                impact_level: "low".into(),
                action_items: vec!["Create a rule or folder for this sender".into()],
                estimated_time_saved: top.count / 4,
            });
        }

        if insights.is_empty() {
            insights.push(ActionableInsight {
                insight_type: "overview".into(),
                title: "Inbox looks healthy".into(),
                description: format!(
                    "{} emails analyzed over {} days with no notable issues.",
                    stats.total_emails, stats.period_days
                ),
                impact_level: "low".into(),
                action_items: vec!["Keep your current routine".into()],
                estimated_time_saved: 0,
            });
        }

        insights
    }

    pub fn narrate_trends(&self, summary: &TrendSummary) -> TrendNarrative {
        let volumes: Vec<i64> = summary.daily_volumes.values().copied().collect();
        let half = volumes.len() / 2;
        let earlier: i64 = volumes[..half].iter().sum();
        let later: i64 = volumes[volumes.len() - half..].iter().sum();

        let volume_trend = if earlier == 0 || half == 0 {
            "stable"
        } else {
            let change = (later - earlier) as f64 / earlier as f64;
            if change > 0.1 {
                "increasing"
            } else if change < -0.1 {
                "decreasing"
            } else {
                "stable"
            }
        };

        let sentiment_total: i64 = summary.sentiment_distribution.values().sum();
        let share = |label: &str| {
            summary.sentiment_distribution.get(label).copied().unwrap_or(0) as f64
                / sentiment_total.max(1) as f64
        };
        let (positive, negative) = (share("positive"), share("negative"));
        let sentiment_trend = if positive > negative && positive > 0.3 {
            "positive"
        } else if negative > positive && negative > 0.3 {
            "negative"
        } else {
            "neutral"
        };

        let categorized: i64 = summary.category_distribution.values().sum();
        let mut categories: Vec<(&String, &i64)> = summary.category_distribution.iter().collect();
        categories.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        let mut key_trends = vec![format!(
            "Email volume is {volume_trend} over the last {} days",
            summary.period_days
        )];
        if let Some((category, count)) = categories.first() {
            key_trends.push(format!(
                "Most emails are '{category}' ({:.1}%)",
                **count as f64 / categorized.max(1) as f64 * 100.0
            ));
        }

        let notable_patterns = summary
            .daily_volumes
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(day, count)| vec![format!("Busiest day was {day} with {count} emails")])
            .unwrap_or_default();

        let mut risk_areas = Vec::new();
        if negative > 0.25 {
            risk_areas.push(format!(
                "{:.0}% of analyzed emails carry negative sentiment",
                negative * 100.0
            ));
        }
        if volume_trend == "increasing" {
            risk_areas.push("Rising volume may crowd out important messages".to_string());
        }

        let mut recommendations = Vec::new();
        if volume_trend == "increasing" {
            recommendations.push("Set up filters for high-volume senders".to_string());
        }
        if sentiment_trend == "negative" {
            recommendations.push("Prioritise resolving threads with negative tone".to_string());
        }
        if recommendations.is_empty() {
            recommendations.push("Maintain your current inbox routine".to_string());
        }

        let confidence_level = match summary.data_points {
            n if n >= 100 => "high",
            n if n >= 30 => "medium",
            _ => "low",
        };

        TrendNarrative {
            key_trends,
            sentiment_trend: sentiment_trend.into(),
            volume_trend: volume_trend.into(),
            notable_patterns,
            recommendations,
            risk_areas,
            confidence_level: confidence_level.into(),
        }
    }

    pub fn summarize_executive(&self, metrics: &ExecutiveMetrics) -> ExecutiveNarrative {
        let mut highlights = vec![format!(
            "{} emails received this {}, {} of them important",
            metrics.total_emails, metrics.period, metrics.important_emails
        )];
        let mut concerns = Vec::new();
        let mut recommendations = Vec::new();

        if let Some(top) = metrics.top_categories.first() {
            highlights.push(format!("'{}' was the largest category ({} emails)", top.category, top.count));
        }

        if metrics.total_emails > 0 && metrics.response_rate < 50.0 {
            concerns.push(format!("Only {:.1}% of emails received a reply", metrics.response_rate));
            recommendations.push("Triage the inbox daily and reply to important threads first".to_string());
        } else if metrics.total_emails > 0 {
            highlights.push(format!("Response rate of {:.1}%", metrics.response_rate));
        }

        match metrics.avg_response_time_hours {
            Some(hours) if hours > 24.0 => {
                concerns.push(format!("Average response time is {hours:.1} hours"));
                recommendations.push("Aim to answer important emails within one business day".to_string());
            }
            Some(hours) => highlights.push(format!("Average response time of {hours:.1} hours")),
            None => {}
        }

        let important_share =
            metrics.important_emails as f64 / metrics.total_emails.max(1) as f64;
        if important_share > 0.3 {
            concerns.push(format!(
                "{:.0}% of emails are flagged important",
                important_share * 100.0
            ));
            recommendations.push("Delegate or batch lower-stakes important emails".to_string());
        }

        if recommendations.is_empty() {
            recommendations.push("Keep the current cadence".to_string());
        }

        ExecutiveNarrative {
            highlights,
            concerns,
            recommendations,
        }
    }
}

#[async_trait]
impl AiProvider for HeuristicAnalyzer {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn analyze_email(&self, content: &EmailContent) -> Result<EmailAnalysis, AiError> {
        Ok(self.analyze(content))
    }

    async fn classify(
        &self,
        content: &EmailContent,
        categories: &[String],
    ) -> Result<String, AiError> {
        Ok(self.classify_into(content, categories))
    }

    async fn actionable_insights(
        &self,
        stats: &InsightStats,
    ) -> Result<Vec<ActionableInsight>, AiError> {
        Ok(self.insights_for(stats))
    }

    async fn trend_narrative(&self, summary: &TrendSummary) -> Result<TrendNarrative, AiError> {
        Ok(self.narrate_trends(summary))
    }

    async fn executive_summary(
        &self,
        metrics: &ExecutiveMetrics,
    ) -> Result<ExecutiveNarrative, AiError> {
        Ok(self.summarize_executive(metrics))
    }
}

fn contains_any(text: &str, terms: &[&str]) -> bool {
    terms.iter().any(|term| text.contains(term))
}

fn tokenize(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .collect()
}

fn categorize(text: &str, sender: &str) -> EmailCategory {
    let best = CATEGORY_KEYWORDS
        .iter()
        .map(|(category, keywords)| {
            let hits: usize = keywords.iter().map(|k| text.matches(k).count()).sum();
            (*category, hits)
        })
        .fold(None, |best: Option<(EmailCategory, usize)>, (category, hits)| match best {
            Some((_, top)) if top >= hits => best,
            _ if hits > 0 => Some((category, hits)),
            _ => best,
        });

    if let Some((category, _)) = best {
        return category;
    }

    let sender = sender.to_lowercase();
    if sender.contains("noreply") || sender.contains("no-reply") || sender.contains("notifications") {
        EmailCategory::Notification
    } else {
        EmailCategory::Personal
    }
}

fn sentiment_score(words: &[&str]) -> f64 {
    let positive = words.iter().filter(|w| POSITIVE_WORDS.contains(*w)).count() as f64;
    let negative = words.iter().filter(|w| NEGATIVE_WORDS.contains(*w)).count() as f64;

    if positive + negative == 0.0 {
        return 0.0;
    }
    ((positive - negative) / (positive + negative)).clamp(-1.0, 1.0)
}

fn key_topics(words: &[&str], n: usize) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for word in words {
        if word.chars().count() >= 4
            && !STOPWORDS.contains(word)
            && !word.chars().all(|c| c.is_ascii_digit())
        {
            *counts.entry(*word).or_default() += 1;
        }
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.into_iter().take(n).map(|(w, _)| w.to_string()).collect()
}

fn summarize(content: &EmailContent) -> String {
    let source = if content.body.trim().is_empty() {
        content.subject.trim()
    } else {
        content.body.trim()
    };

    let mut summary = String::new();
    for sentence in sentences(source) {
        let candidate_len = summary.chars().count()
            + sentence.chars().count()
            + usize::from(!summary.is_empty());
        if candidate_len > SUMMARY_MAX_CHARS {
            break;
        }
        if !summary.is_empty() {
            summary.push(' ');
        }
        summary.push_str(sentence);
    }

    if summary.is_empty() && !source.is_empty() {
        summary = source.chars().take(SUMMARY_MAX_CHARS - 3).collect::<String>();
        summary.push_str("...");
    }
    summary
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::analytics::SenderCount;
    use std::collections::BTreeMap;

    fn email(subject: &str, body: &str) -> EmailContent {
        EmailContent {
            subject: subject.into(),
            sender: "someone@example.com".into(),
            body: body.into(),
            has_attachments: false,
        }
    }

    #[test]
    fn promotional_mail_is_low_priority() {
        let analysis = HeuristicAnalyzer.analyze(&email(
            "Big sale this weekend",
            "Get 50% off everything. Limited time offer, buy now!",
        ));
        assert_eq!(analysis.category, EmailCategory::Promotional);
        assert_eq!(analysis.priority, Priority::Low);
        assert!(!analysis.requires_action);
        assert_eq!(analysis.action_type, None);
    }

    #[test]
    fn urgent_work_request_needs_action() {
        let mut content = email(
            "Urgent: project report",
            "Please review the attached report before the meeting. Can you confirm by today?",
        );
        content.has_attachments = true;
        let analysis = HeuristicAnalyzer.analyze(&content);

        assert!(analysis.importance_score >= 0.8);
        assert_eq!(analysis.priority, Priority::Urgent);
        assert!(analysis.requires_action);
        assert_eq!(analysis.action_type.as_deref(), Some("schedule"));
        assert_eq!(analysis.confidence, 0.5);
    }

    #[test]
    fn sentiment_follows_lexicon() {
        let happy = HeuristicAnalyzer.analyze(&email("Thanks", "Great work, I really appreciate it."));
        assert_eq!(happy.sentiment, Sentiment::Positive);
        assert_eq!(happy.sentiment_score, 1.0);

        let upset = HeuristicAnalyzer.analyze(&email(
            "Problem with my order",
            "Unfortunately the item arrived broken and I am disappointed.",
        ));
        assert_eq!(upset.sentiment, Sentiment::Negative);

        let flat = HeuristicAnalyzer.analyze(&email("Hi", "See attached."));
        assert_eq!(flat.sentiment, Sentiment::Neutral);
        assert_eq!(flat.sentiment_score, 0.0);
    }

    #[test]
    fn unmatched_noreply_sender_is_a_notification() {
        let mut content = email("Hello", "Hi");
        content.sender = "noreply@service.io".into();
        assert_eq!(HeuristicAnalyzer.analyze(&content).category, EmailCategory::Notification);
    }

    #[test]
    fn key_topics_rank_by_frequency() {
        let analysis = HeuristicAnalyzer.analyze(&email(
            "Budget planning",
            "The budget for marketing. Marketing budget review. Budget approved.",
        ));
        assert_eq!(analysis.key_topics, vec!["budget", "marketing", "approved"]);
    }

    #[test]
    fn summary_keeps_whole_sentences_within_limit() {
        let long = "A".repeat(190);
        let body = format!("First sentence here. {long}. Third.");
        let summary = summarize(&email("s", &body));
        assert_eq!(summary, "First sentence here.");

        let single = "word ".repeat(100);
        let summary = summarize(&email("s", &single));
        assert_eq!(summary.chars().count(), SUMMARY_MAX_CHARS);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn summary_falls_back_to_subject() {
        assert_eq!(summarize(&email("Lunch?", "")), "Lunch?");
    }

    #[test]
    fn classify_prefers_named_custom_category() {
        let content = email("Invoice #42", "Your invoice for billing period March is attached.");
        let categories = vec!["travel".to_string(), "invoice".to_string()];
        assert_eq!(HeuristicAnalyzer.classify_into(&content, &categories), "invoice");
    }

    #[test]
    fn classify_maps_builtin_category_case_insensitively() {
        let content = email("Weekly digest", "This week in Rust. Read more online.");
        let categories = vec!["Newsletter".to_string(), "Finance".to_string()];
        assert_eq!(HeuristicAnalyzer.classify_into(&content, &categories), "Newsletter");
    }

    #[test]
    fn insights_always_include_something() {
        let stats = InsightStats {
            period_days: 7,
            total_emails: 0,
            action_required: 0,
            avg_sentiment: 0.0,
            category_distribution: BTreeMap::new(),
            top_senders: vec![],
        };
        let insights = HeuristicAnalyzer.insights_for(&stats);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].insight_type, "overview");
    }

    #[test]
    fn insights_flag_bulk_mail_and_dominant_sender() {
        let stats = InsightStats {
            period_days: 7,
            total_emails: 10,
            action_required: 0,
            avg_sentiment: 0.1,
            category_distribution: BTreeMap::from([
                ("promotional".to_string(), 3),
                ("newsletter".to_string(), 2),
                ("work".to_string(), 5),
            ]),
            top_senders: vec![SenderCount {
                sender_email: "deals@shop.com".into(),
                count: 4,
            }],
        };
        let types: Vec<String> = HeuristicAnalyzer
            .insights_for(&stats)
            .into_iter()
            .map(|i| i.insight_type)
            .collect();
        assert_eq!(types, vec!["productivity", "time_management"]);
    }

    #[test]
    fn trend_narrative_detects_rising_volume() {
        let summary = TrendSummary {
            period_days: 4,
            data_points: 20,
            category_distribution: BTreeMap::from([("work".to_string(), 20)]),
            sentiment_distribution: BTreeMap::from([("neutral".to_string(), 20)]),
            daily_volumes: BTreeMap::from([
                ("2025-01-01".to_string(), 2),
                ("2025-01-02".to_string(), 3),
                ("2025-01-03".to_string(), 6),
                ("2025-01-04".to_string(), 9),
            ]),
        };
        let narrative = HeuristicAnalyzer.narrate_trends(&summary);
        assert_eq!(narrative.volume_trend, "increasing");
        assert_eq!(narrative.sentiment_trend, "neutral");
        assert_eq!(narrative.confidence_level, "low");
        assert_eq!(narrative.notable_patterns, vec!["Busiest day was 2025-01-04 with 9 emails"]);
    }

    #[test]
    fn executive_summary_raises_slow_responses() {
        let metrics = ExecutiveMetrics {
            period: "week".into(),
            total_emails: 40,
            important_emails: 4,
            response_rate: 20.0,
            avg_response_time_hours: Some(30.0),
            top_categories: vec![],
        };
        let narrative = HeuristicAnalyzer.summarize_executive(&metrics);
        assert_eq!(narrative.concerns.len(), 2);
        assert_eq!(narrative.recommendations.len(), 2);
    }
}
