use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::types::{MemberId, MemberListing, MemberRecord};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed member block id: {0}")]
    MalformedBlockId(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
}

const NATIONAL_INFO_SEPARATOR: &str = " - ";

static RE_BLOCK_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"member-block-(.*)$").expect("invalid regex: block id"));

static SEL_MEMBER_BLOCK: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"[id*="member-block-"]"#).expect("invalid selector: member block")
});

static SEL_MEMBER_LINK: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"[class*="erpl_member-list-item-content"][href]"#)
        .expect("invalid selector: member link")
});

static SEL_NAME: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".sln-member-name, .erpl_title-h1.mt-1").expect("invalid selector: name")
});

static SEL_EU_FRACTION: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".erpl_title-h3.mt-1:not(.mb-1)").expect("invalid selector: eu fraction")
});

static SEL_NATIONAL_INFO: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".erpl_title-h3.mt-1.mb-1").expect("invalid selector: national info")
});

static SEL_EMAIL_LINK: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"a[class*="link_email"]"#).expect("invalid selector: email link")
});

static SEL_STATUS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".erpl_meps-status").expect("invalid selector: status"));

static SEL_STATUS_HEADER: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".erpl_title-h4").expect("invalid selector: status header")
});

static SEL_COMMITTEE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".erpl_committee").expect("invalid selector: committee"));

fn elem_text(element: ElementRef) -> String {
    element.text().collect::<String>()
}

fn first_text(element: ElementRef) -> Option<String> {
    element
        .text()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn required_text(
    document: &Html,
    selector: &Selector,
    field: &str,
) -> Result<String, ParseError> {
    document
        .select(selector)
        .next()
        .map(elem_text)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ParseError::MissingField(field.to_string()))
}

/// Extracts the numeric member id from a listing block identifier such as
/// `member-block-0-1-197400`.
pub fn parse_block_id(block_id: &str) -> Result<MemberId, ParseError> {
    let caps = RE_BLOCK_ID
        .captures(block_id)
        .ok_or_else(|| ParseError::MalformedBlockId(block_id.to_string()))?;

    let tokens: Vec<&str> = caps[1].split('-').collect();
    if tokens.len() != 3 {
        return Err(ParseError::MalformedBlockId(block_id.to_string()));
    }

    tokens[2]
        .parse::<MemberId>()
        .map_err(|_| ParseError::MalformedBlockId(block_id.to_string()))
}

/// Parses the full member listing into `(id, url)` pairs. Any malformed block
/// fails the whole listing.
pub fn parse_member_list(html: &str) -> Result<Vec<MemberListing>, ParseError> {
    let document = Html::parse_document(html);

    let mut listings = Vec::new();

    for block in document.select(&SEL_MEMBER_BLOCK) {
        let block_id = block.value().id().unwrap_or_default();
        let id = parse_block_id(block_id)?;

        let url = block
            .select(&SEL_MEMBER_LINK)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(|href| href.trim().to_string())
            .filter(|href| !href.is_empty())
            .ok_or_else(|| ParseError::MissingField(format!("member link in {}", block_id)))?;

        listings.push(MemberListing { id, url });
    }

    Ok(listings)
}

/// Reverses the obfuscation applied to `mailto:` links on member pages.
///
/// The site writes addresses back to front with `[dot]` and `[at]` tokens.
/// Feeding an already plain address through this is harmless; the result is
/// simply reversed and fails [`is_valid_email`] only if it lacks an `@`.
pub fn descramble_email(raw: &str) -> String {
    let mail = raw.trim();
    let mail = mail.strip_prefix("mailto:").unwrap_or(mail);
    mail.replace("[dot]", ".")
        .replace("[at]", "@")
        .chars()
        .rev()
        .collect()
}

pub fn is_valid_email(mail: &str) -> bool {
    mail.contains('@')
}

/// Splits a `Country - Party` label. Only the first and the last segment
/// survive, so a party name containing the separator loses its head.
pub fn split_national_info(label: &str) -> (String, String, usize) {
    let segments: Vec<&str> = label.split(NATIONAL_INFO_SEPARATOR).collect();
    let country = segments.first().map(|s| s.trim()).unwrap_or_default();
    let party = segments.last().map(|s| s.trim()).unwrap_or_default();
    (country.to_string(), party.to_string(), segments.len())
}

fn parse_emails(document: &Html, id: MemberId) -> Vec<String> {
    let mut emails = Vec::new();

    for link in document.select(&SEL_EMAIL_LINK) {
        let Some(href) = link.value().attr("href") else {
            log::warn!("Member {}: email link without href was dropped", id);
            continue;
        };

        let mail = descramble_email(href);
        if is_valid_email(&mail) {
            emails.push(mail);
        } else {
            log::warn!(
                "Member {}: the email '{}' was dropped because it is malformed",
                id,
                mail
            );
        }
    }

    emails
}

fn parse_roles(document: &Html) -> Result<BTreeMap<String, Vec<String>>, ParseError> {
    let mut roles = BTreeMap::new();

    for status in document.select(&SEL_STATUS) {
        let label = status
            .select(&SEL_STATUS_HEADER)
            .next()
            .map(|e| elem_text(e).trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ParseError::MissingField("role label".to_string()))?;

        let committees = status
            .select(&SEL_COMMITTEE)
            .map(|e| elem_text(e).trim().to_string())
            .collect();

        roles.insert(label, committees);
    }

    Ok(roles)
}

/// Extracts a [`MemberRecord`] from a stored member page.
///
/// Name, group and national label are required. Malformed email links are
/// logged and dropped without failing the record.
pub fn parse_member_record(id: MemberId, html: &str) -> Result<MemberRecord, ParseError> {
    let document = Html::parse_document(html);

    let name = document
        .select(&SEL_NAME)
        .next()
        .and_then(first_text)
        .ok_or_else(|| ParseError::MissingField("member name".to_string()))?;

    let eu_fraction = required_text(&document, &SEL_EU_FRACTION, "eu fraction")?;

    let national_info = required_text(&document, &SEL_NATIONAL_INFO, "national party")?;
    let (country, national_party, segments) = split_national_info(&national_info);
    if segments > 2 {
        log::warn!(
            "Member {}: national label '{}' has {} segments, keeping country '{}' and party '{}'",
            id,
            national_info.trim(),
            segments,
            country,
            national_party
        );
    }

    let emails = parse_emails(&document, id);
    let roles = parse_roles(&document)?;

    Ok(MemberRecord {
        id,
        name,
        eu_fraction,
        country,
        national_party,
        emails,
        roles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const MINIMAL_MEMBER: &str = r#"
        <div class="erpl_title-h1 mt-1">Jane DOE</div>
        <h3 class="erpl_title-h3 mt-1">Renew Europe Group</h3>
        <div class="erpl_title-h3 mt-1 mb-1">Ireland - Fianna Fáil Party</div>
    "#;

    #[test]
    fn test_parse_member_list_from_fixture() {
        let html =
            fs::read_to_string("fixtures/member_list.html").expect("Failed to read fixture");

        let listings = parse_member_list(&html).expect("Failed to parse member list");

        assert_eq!(listings.len(), 3);
        assert_eq!(
            listings[0],
            MemberListing {
                id: 197400,
                url: "https://www.europarl.europa.eu/meps/en/197400".to_string(),
            }
        );
        assert_eq!(listings[1].id, 28219);
        assert_eq!(listings[2].id, 124831);
        assert_eq!(listings[2].url, "/meps/en/124831");
    }

    #[test]
    fn test_parse_member_list_single_block() {
        let html = r#"<div id="member-block-x-y-12345"><a class="erpl_member-list-item-content" href="https://ex/mep/12345">A</a></div>"#;

        let listings = parse_member_list(html).expect("Failed to parse member list");

        assert_eq!(
            listings,
            vec![MemberListing {
                id: 12345,
                url: "https://ex/mep/12345".to_string(),
            }]
        );
    }

    #[test]
    fn test_parse_member_list_empty() {
        let listings = parse_member_list("<html><body></body></html>").unwrap();
        assert!(listings.is_empty());
    }

    #[test]
    fn test_parse_member_list_malformed_block_id() {
        let html = r#"<div id="member-block-12345"><a class="erpl_member-list-item-content" href="https://ex/mep/12345">A</a></div>"#;

        let err = parse_member_list(html).unwrap_err();
        assert!(matches!(err, ParseError::MalformedBlockId(ref id) if id == "member-block-12345"));
    }

    #[test]
    fn test_parse_member_list_missing_link() {
        let html = r#"<div id="member-block-0-0-1"><span>no anchor</span></div>"#;

        let err = parse_member_list(html).unwrap_err();
        assert!(matches!(err, ParseError::MissingField(_)));
    }

    #[test]
    fn test_parse_block_id() {
        assert_eq!(parse_block_id("member-block-0-0-197400").unwrap(), 197400);
        assert!(parse_block_id("member-block-0-0-abc").is_err());
        assert!(parse_block_id("member-block-0-0-0-1").is_err());
        assert!(parse_block_id("block-0-0-1").is_err());
    }

    #[test]
    fn test_descramble_email() {
        assert_eq!(
            descramble_email("mailto:moc[dot]elpmaxe[at]eman"),
            "name@example.com"
        );
        assert_eq!(
            descramble_email("ue[dot]aporue[dot]lraporue[at]ikslawok[dot]naj"),
            "jan.kowalski@europarl.europa.eu"
        );
    }

    #[test]
    fn test_descramble_plain_address_does_not_panic() {
        let twice = descramble_email(&descramble_email("mailto:moc[dot]elpmaxe[at]eman"));
        assert_eq!(twice, "moc.elpmaxe@eman");
        assert!(is_valid_email(&twice));

        let plain = descramble_email("not-an-address");
        assert!(!is_valid_email(&plain));
        assert_eq!(descramble_email(""), "");
    }

    #[test]
    fn test_split_national_info() {
        let (country, party, segments) = split_national_info("France - Some Party - Faction");
        assert_eq!(country, "France");
        assert_eq!(party, "Faction");
        assert_eq!(segments, 3);

        let (country, party, segments) = split_national_info("  Poland - Independent \n");
        assert_eq!(country, "Poland");
        assert_eq!(party, "Independent");
        assert_eq!(segments, 2);
    }

    #[test]
    fn test_parse_member_record_from_fixture() {
        let html =
            fs::read_to_string("fixtures/member_197400.html").expect("Failed to read fixture");

        let record = parse_member_record(197400, &html).expect("Failed to parse member");

        assert_eq!(record.id, 197400);
        assert_eq!(record.name, "Magdalena ADAMOWICZ");
        assert_eq!(
            record.eu_fraction,
            "Group of the European People's Party (Christian Democrats)"
        );
        assert_eq!(record.country, "Poland");
        assert_eq!(record.national_party, "Independent");
        assert_eq!(
            record.emails,
            vec![
                "magdalena.adamowicz@europarl.europa.eu".to_string(),
                "assistant.adamowicz@europarl.europa.eu".to_string(),
            ]
        );
        assert_eq!(record.roles.len(), 2);
        assert_eq!(
            record.roles["Member"],
            vec![
                "Committee on Civil Liberties, Justice and Home Affairs".to_string(),
                "Committee on Petitions".to_string(),
            ]
        );
        assert_eq!(
            record.roles["Substitute"],
            vec!["Committee on Culture and Education".to_string()]
        );
    }

    #[test]
    fn test_parse_member_record_older_layout() {
        let html =
            fs::read_to_string("fixtures/member_28219.html").expect("Failed to read fixture");

        let record = parse_member_record(28219, &html).expect("Failed to parse member");

        assert_eq!(record.name, "Jan KOWALSKI");
        assert_eq!(record.country, "Poland");
        assert_eq!(record.national_party, "Wspólna Sprawa");
        assert_eq!(record.emails, vec!["jan.kowalski@europarl.europa.eu"]);
        assert!(record.roles.is_empty());
    }

    #[test]
    fn test_parse_member_record_keeps_raw_eu_fraction() {
        let html = r#"
            <div class="erpl_title-h1 mt-1">Jane DOE</div>
            <h3 class="erpl_title-h3 mt-1"> The Left </h3>
            <div class="erpl_title-h3 mt-1 mb-1">Ireland - Sinn Féin</div>
        "#;

        let record = parse_member_record(1, html).unwrap();
        assert_eq!(record.eu_fraction, " The Left ");
    }

    #[test]
    fn test_parse_member_record_missing_name() {
        let html = MINIMAL_MEMBER.replace("erpl_title-h1 mt-1", "erpl_title-h2");

        let err = parse_member_record(1, &html).unwrap_err();
        assert!(matches!(err, ParseError::MissingField(ref f) if f == "member name"));
    }

    #[test]
    fn test_parse_member_record_blank_name() {
        let html = MINIMAL_MEMBER.replace("Jane DOE", "   ");

        let err = parse_member_record(1, &html).unwrap_err();
        assert!(matches!(err, ParseError::MissingField(ref f) if f == "member name"));
    }

    #[test]
    fn test_parse_member_record_missing_eu_fraction() {
        let html = MINIMAL_MEMBER.replace(
            r#"<h3 class="erpl_title-h3 mt-1">Renew Europe Group</h3>"#,
            "",
        );

        let err = parse_member_record(1, &html).unwrap_err();
        assert!(matches!(err, ParseError::MissingField(ref f) if f == "eu fraction"));
    }

    #[test]
    fn test_parse_member_record_missing_national_info() {
        let html = MINIMAL_MEMBER.replace("Ireland - Fianna Fáil Party", "");

        let err = parse_member_record(1, &html).unwrap_err();
        assert!(matches!(err, ParseError::MissingField(ref f) if f == "national party"));
    }

    #[test]
    fn test_parse_member_record_status_without_header() {
        let html = format!(
            r#"{}<div class="erpl_meps-status"><span class="erpl_committee">X</span></div>"#,
            MINIMAL_MEMBER
        );

        let err = parse_member_record(1, &html).unwrap_err();
        assert!(matches!(err, ParseError::MissingField(ref f) if f == "role label"));
    }

    #[test]
    fn test_parse_member_record_duplicate_role_last_wins() {
        let html = format!(
            r#"{}
            <div class="erpl_meps-status"><h4 class="erpl_title-h4">Member</h4><span class="erpl_committee">First</span></div>
            <div class="erpl_meps-status"><h4 class="erpl_title-h4">Member</h4><span class="erpl_committee">Second</span></div>
            "#,
            MINIMAL_MEMBER
        );

        let record = parse_member_record(1, &html).unwrap();
        assert_eq!(record.roles.len(), 1);
        assert_eq!(record.roles["Member"], vec!["Second".to_string()]);
    }

    #[test]
    fn test_parse_member_record_malformed_emails_are_dropped() {
        let html = format!(
            r#"{}
            <a class="link_email" href="mailto:nothing-here">x</a>
            <a class="link_email">no href</a>
            <a class="link_email" href="mailto:moc[dot]elpmaxe[at]eman">x</a>
            "#,
            MINIMAL_MEMBER
        );

        let record = parse_member_record(1, &html).unwrap();
        assert_eq!(record.emails, vec!["name@example.com".to_string()]);
    }
}
