use dashmap::DashMap;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::network::Fetcher;
use crate::url_utils;

/// Parsed rules of the robots.txt group that applies to our user agent.
#[derive(Debug, Clone, Default)]
pub struct RobotsTxt {
    rules: Vec<Rule>,
    crawl_delay: Option<Duration>,
}

#[derive(Debug, Clone)]
struct Rule {
    is_allow: bool,
    pattern: String,
    regex: Option<Regex>,
}

#[derive(Debug, Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
    crawl_delay: Option<Duration>,
}

impl RobotsTxt {
    pub fn new(content: &str, user_agent: &str) -> Self {
        let groups = Self::parse_groups(content);
        let token = Self::product_token(user_agent);

        let specific = groups
            .iter()
            .find(|g| g.agents.iter().any(|a| a != "*" && token.contains(a.as_str())));
        let chosen = specific.or_else(|| groups.iter().find(|g| g.agents.iter().any(|a| a == "*")));

        match chosen {
            Some(group) => Self {
                rules: group.rules.clone(),
                crawl_delay: group.crawl_delay,
            },
            None => Self::default(),
        }
    }

    /// "CorpusCrawler/0.1 (+info)" -> "corpuscrawler"
    fn product_token(user_agent: &str) -> String {
        user_agent
            .split(|c: char| c == '/' || c.is_whitespace())
            .next()
            .unwrap_or_default()
            .to_lowercase()
    }

    fn parse_groups(content: &str) -> Vec<Group> {
        let mut groups: Vec<Group> = Vec::new();
        let mut current = Group::default();
        // A user-agent line after any rule starts a new group.
        let mut saw_directive = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if saw_directive {
                        groups.push(std::mem::take(&mut current));
                        saw_directive = false;
                    }
                    current.agents.push(value.to_lowercase());
                }
                "disallow" | "allow" => {
                    saw_directive = true;
                    if !value.is_empty() {
                        current.rules.push(Rule {
                            is_allow: key == "allow",
                            pattern: value.to_string(),
                            regex: Self::create_regex(value),
                        });
                    }
                }
                "crawl-delay" => {
                    saw_directive = true;
                    if let Ok(secs) = value.parse::<f64>() {
                        if secs.is_finite() && secs >= 0.0 {
                            current.crawl_delay = Some(Duration::from_secs_f64(secs));
                        }
                    }
                }
                _ => {}
            }
        }

        if !current.agents.is_empty() {
            groups.push(current);
        }
        groups
    }

    fn create_regex(pattern: &str) -> Option<Regex> {
        if !pattern.contains('*') && !pattern.ends_with('$') {
            return None;
        }

        let (body, anchored) = match pattern.strip_suffix('$') {
            Some(body) => (body, true),
            None => (pattern, false),
        };

        let mut regex_pattern = format!("^{}", regex::escape(body).replace("\\*", ".*"));
        if anchored {
            regex_pattern.push('$');
        }

        Regex::new(&regex_pattern).ok()
    }

    fn matches(rule: &Rule, path: &str) -> bool {
        match rule.regex {
            Some(ref regex) => regex.is_match(path),
            None => path.starts_with(&rule.pattern),
        }
    }

    /// Longest matching pattern decides; Allow wins ties.
    pub fn is_path_allowed(&self, path: &str) -> bool {
        let mut best: Option<(usize, bool)> = None;
        for rule in &self.rules {
            if !Self::matches(rule, path) {
                continue;
            }
            let len = rule.pattern.len();
            best = match best {
                Some((best_len, best_allow)) if best_len > len || (best_len == len && best_allow) => {
                    Some((best_len, best_allow))
                }
                _ => Some((len, rule.is_allow)),
            };
        }
        best.map(|(_, allow)| allow).unwrap_or(true)
    }

    pub fn is_allowed(&self, url: &Url) -> bool {
        let target = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };
        self.is_path_allowed(&target)
    }

    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay
    }
}

/// What is known about a host's robots.txt.
#[derive(Debug, Clone)]
pub enum HostRobots {
    Rules(RobotsTxt),
    AllowAll,
    DisallowAll,
    /// robots.txt could not be determined (server error, transport failure, never fetched).
    Unknown,
}

impl HostRobots {
    pub fn from_response(status: u16, body: &[u8], user_agent: &str) -> Self {
        match status {
            200..=299 => Self::Rules(RobotsTxt::new(&String::from_utf8_lossy(body), user_agent)),
            401 | 403 => Self::DisallowAll,
            400..=499 => Self::AllowAll,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotsVerdict {
    Allowed,
    Disallowed,
    Unknown,
}

/// Per-host robots.txt policies, each fetched at most once per process.
pub struct RobotsCache {
    entries: DashMap<String, Arc<HostRobots>>,
    fetcher: Arc<dyn Fetcher>,
    user_agent: String,
}

impl RobotsCache {
    pub fn new(fetcher: Arc<dyn Fetcher>, user_agent: String) -> Self {
        Self {
            entries: DashMap::new(),
            fetcher,
            user_agent,
        }
    }

    /// Install a policy directly (startup warm-up and tests).
    pub fn insert(&self, host: &str, robots: HostRobots) {
        self.entries.insert(host.to_ascii_lowercase(), Arc::new(robots));
    }

    pub fn get(&self, host: &str) -> Option<Arc<HostRobots>> {
        self.entries.get(host).map(|e| Arc::clone(e.value()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fetch and cache robots.txt for the host of `url` unless already cached.
    ///
    /// Two workers racing on the same host may both fetch; the later insert wins.
    pub async fn populate(&self, url: &Url) -> Arc<HostRobots> {
        let Some(host) = url.host_str().map(|h| h.to_ascii_lowercase()) else {
            return Arc::new(HostRobots::Unknown);
        };
        if let Some(cached) = self.get(&host) {
            return cached;
        }

        let robots = match url_utils::robots_url(url) {
            Some(robots_url) => match self.fetcher.fetch(&robots_url).await {
                Ok(resp) => HostRobots::from_response(resp.status, &resp.body, &self.user_agent),
                Err(e) => {
                    debug!(host = %host, error = %e, "robots.txt fetch failed");
                    HostRobots::Unknown
                }
            },
            None => HostRobots::Unknown,
        };

        info!(host = %host, policy = %Self::describe(&robots), "cached robots.txt");
        let robots = Arc::new(robots);
        self.entries.insert(host, Arc::clone(&robots));
        robots
    }

    /// Warm the cache for a set of seed URLs.
    pub async fn warm<'a, I: IntoIterator<Item = &'a str>>(&self, urls: I) {
        for raw in urls {
            if let Ok(url) = Url::parse(raw) {
                self.populate(&url).await;
            }
        }
    }

    /// Evaluate `url` against cached rules. With `may_fetch`, a missing entry is fetched first.
    pub async fn verdict(&self, url: &Url, may_fetch: bool) -> RobotsVerdict {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let robots = match self.get(&host) {
            Some(robots) => robots,
            None if may_fetch => self.populate(url).await,
            None => return RobotsVerdict::Unknown,
        };

        match robots.as_ref() {
            HostRobots::Rules(rules) if rules.is_allowed(url) => RobotsVerdict::Allowed,
            HostRobots::Rules(_) => RobotsVerdict::Disallowed,
            HostRobots::AllowAll => RobotsVerdict::Allowed,
            HostRobots::DisallowAll => RobotsVerdict::Disallowed,
            HostRobots::Unknown => RobotsVerdict::Unknown,
        }
    }

    pub fn crawl_delay(&self, host: &str) -> Option<Duration> {
        self.entries.get(host).and_then(|e| match e.value().as_ref() {
            HostRobots::Rules(rules) => rules.crawl_delay(),
            _ => None,
        })
    }

    fn describe(robots: &HostRobots) -> &'static str {
        match robots {
            HostRobots::Rules(_) => "rules",
            HostRobots::AllowAll => "allow-all",
            HostRobots::DisallowAll => "disallow-all",
            HostRobots::Unknown => "unknown",
        }
    }
}
