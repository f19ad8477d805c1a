//! Offline keyword responder, the last tier of the reply cascade.
//!
//! Messages are matched case-insensitively against an ordered list of
//! categories; the first category with a matching keyword wins. ASCII
//! keywords must match on word boundaries ("hi" does not match "this"),
//! other keywords (Japanese) match as substrings.

/// Reply categories, in matching priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Greeting,
    Identity,
    ErrorInquiry,
    Default,
}

const GREETING_KEYWORDS: &[&str] = &[
    "hello",
    "hi",
    "hey",
    "good morning",
    "good afternoon",
    "good evening",
    "こんにちは",
    "こんばんは",
    "おはよう",
    "はじめまして",
    "よろしく",
];

const IDENTITY_KEYWORDS: &[&str] = &[
    "who are you",
    "what are you",
    "your name",
    "introduce yourself",
    "are you a bot",
    "are you an ai",
    "誰",
    "だれ",
    "何者",
    "自己紹介",
    "名前",
];

// ASCII entries match whole words only, so inflections are listed.
const ERROR_KEYWORDS: &[&str] = &[
    "error",
    "errors",
    "bug",
    "bugs",
    "buggy",
    "broken",
    "broke",
    "not working",
    "doesn't work",
    "does not work",
    "fail",
    "fails",
    "failed",
    "failing",
    "failure",
    "crash",
    "crashes",
    "crashed",
    "crashing",
    "エラー",
    "不具合",
    "バグ",
    "動かない",
    "壊れ",
];

const GREETING_REPLY: &str = "Hello! I'm the Lab AI Agent. Ask me anything about this \
    lab's research, works, or blog posts.";
const IDENTITY_REPLY: &str = "I'm the Lab AI Agent, a guide to this website. I can tell \
    you about the lab's projects, publications, and activities.";
const ERROR_REPLY: &str = "Sorry for the trouble. If something on the site isn't working, \
    please try reloading the page, and contact the lab if the problem continues.";
const DEFAULT_REPLY: &str = "I'm having trouble reaching my knowledge sources right now, so \
    I can't answer that properly. Please try again in a little while.";

/// Deterministic, I/O-free responder.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalResponder;

impl LocalResponder {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, message: &str) -> Category {
        let lowered = message.to_lowercase();
        let table: [(Category, &[&str]); 3] = [
            (Category::Greeting, GREETING_KEYWORDS),
            (Category::Identity, IDENTITY_KEYWORDS),
            (Category::ErrorInquiry, ERROR_KEYWORDS),
        ];

        table
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| contains_keyword(&lowered, k)))
            .map(|(category, _)| *category)
            .unwrap_or(Category::Default)
    }

    pub fn reply(&self, message: &str) -> &'static str {
        reply_for(self.classify(message))
    }
}

pub fn reply_for(category: Category) -> &'static str {
    match category {
        Category::Greeting => GREETING_REPLY,
        Category::Identity => IDENTITY_REPLY,
        Category::ErrorInquiry => ERROR_REPLY,
        Category::Default => DEFAULT_REPLY,
    }
}

fn contains_keyword(haystack: &str, keyword: &str) -> bool {
    if !keyword.is_ascii() {
        return haystack.contains(keyword);
    }

    haystack.match_indices(keyword).any(|(start, matched)| {
        let end = start + matched.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}
