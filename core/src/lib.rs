//! Keyword-to-link rewriting engine.
//! Replaces configured keyword mentions inside HTML documents with anchor
//! links while leaving markup, existing links, and protected regions alone.

use std::fmt::Write as _;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod segment;

use segment::{Segment, SegmentKind};

/// A configured keyword-to-URL rule.
///
/// `nofollow` and `new_tab` are overrides: `false` inherits the global
/// setting, `true` forces the behaviour on. `max_replacements == 0` defers
/// to the global per-mapping cap. Inactive rules are the caller's concern
/// and must be filtered out before the engine sees them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Mapping {
    pub id: u64,
    pub keyword: String,
    pub target_url: String,
    pub nofollow: bool,
    pub new_tab: bool,
    pub max_replacements: u32,
}

/// Document-wide settings for one rewrite call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    /// Per-mapping cap used when a mapping's own cap is 0. Must be positive.
    pub max_replacements: u32,
    pub nofollow: bool,
    pub new_tab: bool,
    pub case_sensitive: bool,
    /// Total anchors across all mappings combined; 0 means unlimited.
    pub max_links_per_post: u32,
    /// Canonical URL of the document being rewritten, for self-link
    /// prevention. Mappings targeting this URL are never applied.
    pub current_url: Option<String>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            max_replacements: 1,
            nofollow: false,
            new_tab: true,
            case_sensitive: false,
            max_links_per_post: 0,
            current_url: None,
        }
    }
}

/// In-process call contract: one document plus the rules to apply to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaceRequest {
    pub document: String,
    pub mappings: Vec<Mapping>,
    pub settings: GlobalSettings,
}

impl Default for ReplaceRequest {
    fn default() -> Self {
        Self {
            document: String::new(),
            mappings: Vec::new(),
            settings: GlobalSettings::default(),
        }
    }
}

/// Result of the call contract: the rewritten document and a link count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceResult {
    pub document: String,
    pub links_inserted: usize,
}

/// Advisory attribution record: how often one mapping actually linked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedMapping {
    pub mapping_id: u64,
    pub count: usize,
}

/// Outcome of rewriting one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rewrite {
    pub html: String,
    pub links_inserted: usize,
    /// Mappings that linked at least once, in processing order.
    pub linked: Vec<LinkedMapping>,
}

impl Rewrite {
    fn unchanged(document: &str) -> Self {
        Self {
            html: document.to_string(),
            links_inserted: 0,
            linked: Vec::new(),
        }
    }
}

/// Caller-contract violations. Data-quality problems in individual mappings
/// are never errors; those mappings are silently skipped.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("global max_replacements must be positive")]
    ZeroGlobalMax,
}

/// One-shot form of the call contract from a single request value.
pub fn replace_keywords(request: &ReplaceRequest) -> Result<ReplaceResult, Error> {
    let linker = Linker::new(&request.mappings, &request.settings)?;
    let rewrite = linker.rewrite(&request.document);
    Ok(ReplaceResult {
        document: rewrite.html,
        links_inserted: rewrite.links_inserted,
    })
}

/// A mapping after global-default inheritance, pattern compilation, and
/// anchor prebuilding.
struct ResolvedMapping {
    id: u64,
    pattern: Regex,
    /// Opening anchor markup up to (not including) the closing `>`.
    opening: String,
    max_replacements: usize,
}

impl ResolvedMapping {
    fn anchor_for(&self, matched: &str, document_id: Option<u64>) -> String {
        let mut anchor = self.opening.clone();
        if let Some(document_id) = document_id {
            let _ = write!(
                anchor,
                " data-autolink-keyword=\"{}\" data-autolink-post=\"{document_id}\"",
                self.id
            );
        }
        anchor.push('>');
        anchor.push_str(&escape_html(matched));
        anchor.push_str("</a>");
        anchor
    }
}

/// Linker encapsulates resolved mappings for reuse across one document.
///
/// Construction performs the whole preprocessing pass: self-link filtering,
/// length-descending sort, override resolution, and pattern compilation.
/// The caller's mapping slice is never mutated.
pub struct Linker {
    mappings: Vec<ResolvedMapping>,
    prescan: Option<AhoCorasick>,
    max_links_per_post: usize,
}

impl Linker {
    pub fn new(mappings: &[Mapping], settings: &GlobalSettings) -> Result<Self, Error> {
        if settings.max_replacements == 0 {
            return Err(Error::ZeroGlobalMax);
        }

        let current = settings.current_url.as_deref().map(normalize_url);
        let mut eligible: Vec<&Mapping> = mappings
            .iter()
            .filter(|mapping| !mapping.keyword.trim().is_empty())
            .filter(|mapping| usable_target(&mapping.target_url))
            .filter(|mapping| match &current {
                Some(current) => normalize_url(&mapping.target_url) != *current,
                None => true,
            })
            .collect();

        // Longest keyword first (stable) so a phrase always wins over any
        // shorter keyword nested inside it.
        eligible.sort_by(|a, b| b.keyword.len().cmp(&a.keyword.len()));

        let flags = if settings.case_sensitive { "" } else { "(?i)" };
        let mut keywords = Vec::with_capacity(eligible.len());
        let mut resolved = Vec::with_capacity(eligible.len());
        for mapping in eligible {
            let Ok(pattern) =
                Regex::new(&format!("{flags}\\b{}\\b", regex::escape(&mapping.keyword)))
            else {
                continue;
            };
            let nofollow = mapping.nofollow || settings.nofollow;
            let new_tab = mapping.new_tab || settings.new_tab;
            let max_replacements = if mapping.max_replacements > 0 {
                mapping.max_replacements
            } else {
                settings.max_replacements
            };
            keywords.push(mapping.keyword.clone());
            resolved.push(ResolvedMapping {
                id: mapping.id,
                pattern,
                opening: anchor_opening(&mapping.target_url, nofollow, new_tab),
                max_replacements: max_replacements as usize,
            });
        }

        // Fast whole-document prescan; ascii-only because the per-keyword
        // patterns fold case beyond ascii while the prescan cannot.
        let prescan = if !keywords.is_empty() && keywords.iter().all(|k| k.is_ascii()) {
            Some(
                AhoCorasickBuilder::new()
                    .ascii_case_insensitive(!settings.case_sensitive)
                    .build(&keywords),
            )
        } else {
            None
        };

        Ok(Self {
            mappings: resolved,
            prescan,
            max_links_per_post: settings.max_links_per_post as usize,
        })
    }

    /// Number of mappings that survived preprocessing.
    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    /// Rewrite one document, linking eligible keyword mentions.
    pub fn rewrite(&self, document: &str) -> Rewrite {
        self.rewrite_inner(document, None)
    }

    /// Like [`rewrite`](Self::rewrite), but stamps each generated anchor
    /// with tracking attributes naming the mapping and this document, for
    /// downstream click attribution. Tracking never affects matching or
    /// caps.
    pub fn rewrite_tracked(&self, document: &str, document_id: u64) -> Rewrite {
        self.rewrite_inner(document, Some(document_id))
    }

    fn rewrite_inner(&self, document: &str, document_id: Option<u64>) -> Rewrite {
        if document.is_empty() || self.mappings.is_empty() {
            return Rewrite::unchanged(document);
        }
        if let Some(prescan) = &self.prescan {
            if !prescan.is_match(document.as_bytes()) {
                return Rewrite::unchanged(document);
            }
        }

        // Segment once; every mapping walks the same (mutated) list.
        let mut segments = segment::segment(document);
        let mut total = 0usize;
        let mut linked = Vec::new();

        for mapping in &self.mappings {
            if self.budget_exhausted(total) {
                break;
            }
            let mut count = 0usize;
            let mut rebuilt = Vec::with_capacity(segments.len() + 4);
            for piece in segments {
                let capped =
                    count >= mapping.max_replacements || self.budget_exhausted(total);
                if piece.kind == SegmentKind::Protected || capped {
                    rebuilt.push(piece);
                    continue;
                }
                self.link_segment(
                    piece,
                    mapping,
                    document_id,
                    &mut count,
                    &mut total,
                    &mut rebuilt,
                );
            }
            segments = rebuilt;
            if count > 0 {
                linked.push(LinkedMapping {
                    mapping_id: mapping.id,
                    count,
                });
            }
        }

        Rewrite {
            html: segment::assemble(&segments),
            links_inserted: total,
            linked,
        }
    }

    /// Replace matches inside one text segment, splitting it so each new
    /// anchor becomes a protected segment that later mappings skip.
    fn link_segment(
        &self,
        piece: Segment,
        mapping: &ResolvedMapping,
        document_id: Option<u64>,
        count: &mut usize,
        total: &mut usize,
        rebuilt: &mut Vec<Segment>,
    ) {
        let content = piece.content;
        let mut cursor = 0;
        for found in mapping.pattern.find_iter(&content) {
            if *count >= mapping.max_replacements || self.budget_exhausted(*total) {
                break;
            }
            if found.start() > cursor {
                rebuilt.push(Segment::text(&content[cursor..found.start()]));
            }
            rebuilt.push(Segment::protected(
                mapping.anchor_for(found.as_str(), document_id),
            ));
            cursor = found.end();
            *count += 1;
            *total += 1;
        }
        if cursor == 0 {
            rebuilt.push(Segment::text(content));
        } else if cursor < content.len() {
            rebuilt.push(Segment::text(&content[cursor..]));
        }
    }

    fn budget_exhausted(&self, total: usize) -> bool {
        self.max_links_per_post != 0 && total >= self.max_links_per_post
    }
}

/// Build the opening anchor markup for a resolved mapping, up to the `>`.
fn anchor_opening(target_url: &str, nofollow: bool, new_tab: bool) -> String {
    let mut rel_parts = Vec::new();
    if nofollow {
        rel_parts.push("nofollow");
    }
    if new_tab {
        rel_parts.push("noopener");
        rel_parts.push("noreferrer");
    }
    let mut opening = format!("<a href=\"{}\"", escape_html(target_url));
    if !rel_parts.is_empty() {
        let _ = write!(opening, " rel=\"{}\"", rel_parts.join(" "));
    }
    if new_tab {
        opening.push_str(" target=\"_blank\"");
    }
    opening
}

/// Minimal check that a target is a usable absolute or root-relative URL.
fn usable_target(url: &str) -> bool {
    let url = url.trim();
    if url.is_empty() || url.chars().any(char::is_whitespace) {
        return false;
    }
    url.starts_with('/') || url.contains("://")
}

/// Normalise a URL for self-link comparison: lowercase, scheme stripped,
/// trailing slash stripped.
fn normalize_url(url: &str) -> String {
    let lower = url.trim().to_lowercase();
    let without_scheme = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    without_scheme.trim_end_matches('/').to_string()
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_scheme_case_and_trailing_slash() {
        assert_eq!(normalize_url("https://Example.com/Page/"), "example.com/page");
        assert_eq!(normalize_url("http://example.com/page"), "example.com/page");
        assert_eq!(normalize_url("example.com/page/"), "example.com/page");
    }

    #[test]
    fn normalized_forms_collide_across_schemes() {
        assert_eq!(
            normalize_url("https://example.com/a/"),
            normalize_url("HTTP://EXAMPLE.COM/a")
        );
    }

    #[test]
    fn usable_target_rejects_junk() {
        assert!(usable_target("https://example.com/page"));
        assert!(usable_target("/relative/path"));
        assert!(!usable_target(""));
        assert!(!usable_target("   "));
        assert!(!usable_target("not a url"));
        assert!(!usable_target("plain-words"));
    }

    #[test]
    fn escape_html_covers_special_characters() {
        assert_eq!(escape_html("a&b<c>\"d'"), "a&amp;b&lt;c&gt;&quot;d&#039;");
    }

    #[test]
    fn anchor_opening_composes_rel_and_target() {
        assert_eq!(
            anchor_opening("https://x.test/a", true, true),
            "<a href=\"https://x.test/a\" rel=\"nofollow noopener noreferrer\" target=\"_blank\""
        );
        assert_eq!(
            anchor_opening("https://x.test/a", false, false),
            "<a href=\"https://x.test/a\""
        );
        assert_eq!(
            anchor_opening("https://x.test/a", true, false),
            "<a href=\"https://x.test/a\" rel=\"nofollow\""
        );
    }

    #[test]
    fn zero_global_max_is_a_contract_violation() {
        let settings = GlobalSettings {
            max_replacements: 0,
            ..GlobalSettings::default()
        };
        assert!(matches!(
            Linker::new(&[], &settings),
            Err(Error::ZeroGlobalMax)
        ));
    }

    #[test]
    fn preprocessing_drops_malformed_mappings() {
        let mappings = vec![
            Mapping {
                id: 1,
                keyword: "  ".into(),
                target_url: "https://x.test/a".into(),
                ..Mapping::default()
            },
            Mapping {
                id: 2,
                keyword: "ok".into(),
                target_url: "no scheme here".into(),
                ..Mapping::default()
            },
            Mapping {
                id: 3,
                keyword: "kept".into(),
                target_url: "https://x.test/b".into(),
                ..Mapping::default()
            },
        ];
        let linker = Linker::new(&mappings, &GlobalSettings::default()).unwrap();
        assert_eq!(linker.mapping_count(), 1);
    }
}
