use quick_xml::{events::Event, Reader};
use std::{fs, path::Path};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ModDescriptor {
    pub title: String,
    pub version: (u32, u32, u32),
    pub tags: Vec<String>,
    pub description: String,
    pub published_file_id: String,
}

// Descriptor files are third-party content of unverified quality: any read
// or parse failure yields a defaulted descriptor, never an error.
pub fn read_descriptor(path: &Path) -> ModDescriptor {
    match fs::read(path) {
        Ok(bytes) => parse_descriptor(&bytes),
        Err(_) => ModDescriptor::default(),
    }
}

pub fn parse_descriptor(bytes: &[u8]) -> ModDescriptor {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_start_matches('\u{feff}').trim();
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut title: Option<String> = None;
    let mut major: Option<String> = None;
    let mut minor: Option<String> = None;
    let mut build: Option<String> = None;
    let mut description: Option<String> = None;
    let mut published_file_id: Option<String> = None;
    let mut tags: Vec<String> = Vec::new();
    let mut element_stack: Vec<String> = Vec::new();

    loop {
        let value = match reader.read_event() {
            Ok(Event::Start(e)) => {
                element_stack.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                None
            }
            Ok(Event::End(_)) => {
                element_stack.pop();
                None
            }
            Ok(Event::Text(e)) => e.unescape().ok().map(|text| text.into_owned()),
            Ok(Event::CData(e)) => Some(String::from_utf8_lossy(&e.into_inner()).into_owned()),
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => None,
        };
        let Some(value) = value else {
            continue;
        };
        let set_first = |slot: &mut Option<String>, value: String| {
            if slot.is_none() {
                *slot = Some(value);
            }
        };
        // take the first occurrence of each named element
        match element_stack.last().map(String::as_str) {
            Some("Title") => set_first(&mut title, value),
            Some("VersionMajor") => set_first(&mut major, value),
            Some("VersionMinor") => set_first(&mut minor, value),
            Some("TargetBuild") => set_first(&mut build, value),
            Some("ItemDescription") => set_first(&mut description, value),
            Some("PublishedFileId") => set_first(&mut published_file_id, value),
            Some("Tags") => {
                if !value.trim().is_empty() {
                    tags.push(value.trim().to_string());
                }
            }
            _ => {}
        }
    }

    ModDescriptor {
        title: sanitize_title(title.as_deref().unwrap_or("")),
        version: (
            version_component(major),
            version_component(minor),
            version_component(build),
        ),
        tags,
        description: description.unwrap_or_default(),
        published_file_id: published_file_id
            .map(|id| id.trim().to_string())
            .unwrap_or_default(),
    }
}

// Present-but-non-numeric text defaults to 0 rather than failing the parse.
fn version_component(text: Option<String>) -> u32 {
    text.and_then(|value| value.trim().parse().ok()).unwrap_or(0)
}

pub fn sanitize_title(raw: &str) -> String {
    raw.chars()
        .map(|ch| match ch {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => ch,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<project>
    <Title>My Mod</Title>
    <Language>english</Language>
    <ItemDescription>A small trinket pack.</ItemDescription>
    <PublishedFileId>885957080</PublishedFileId>
    <VersionMajor>1</VersionMajor>
    <VersionMinor>4</VersionMinor>
    <TargetBuild>24839</TargetBuild>
    <Tags>trinkets</Tags>
    <Tags>gameplay</Tags>
    <Tags>trinkets</Tags>
    <Tags> </Tags>
</project>
"#;

    #[test]
    fn parses_full_descriptor() {
        let descriptor = parse_descriptor(SAMPLE.as_bytes());
        assert_eq!(descriptor.title, "My Mod");
        assert_eq!(descriptor.version, (1, 4, 24839));
        assert_eq!(descriptor.tags, ["trinkets", "gameplay", "trinkets"]);
        assert_eq!(descriptor.description, "A small trinket pack.");
        assert_eq!(descriptor.published_file_id, "885957080");
    }

    #[test]
    fn missing_file_yields_default() {
        let descriptor = read_descriptor(&PathBuf::from("/nonexistent/project.xml"));
        assert_eq!(descriptor, ModDescriptor::default());
        assert_eq!(descriptor.version, (0, 0, 0));
        assert!(descriptor.tags.is_empty());
    }

    #[test]
    fn malformed_markup_yields_default_fields() {
        for raw in ["not xml at all", "<project><Title>unclosed", ""] {
            let descriptor = parse_descriptor(raw.as_bytes());
            assert_eq!(descriptor.version, (0, 0, 0));
            assert!(descriptor.tags.is_empty());
            assert!(descriptor.published_file_id.is_empty());
        }
    }

    #[test]
    fn invalid_bytes_are_tolerated() {
        let mut raw = b"<project><Title>Torch".to_vec();
        raw.push(0xff);
        raw.extend_from_slice(b"bearer</Title></project>");
        let descriptor = parse_descriptor(&raw);
        assert!(descriptor.title.contains("Torch"));
    }

    #[test]
    fn first_occurrence_wins() {
        let raw = "<project><Title>First</Title><Title>Second</Title></project>";
        assert_eq!(parse_descriptor(raw.as_bytes()).title, "First");
    }

    #[test]
    fn non_numeric_version_defaults_to_zero() {
        let raw = "<project><VersionMajor>two</VersionMajor><VersionMinor>3</VersionMinor></project>";
        assert_eq!(parse_descriptor(raw.as_bytes()).version, (0, 3, 0));
    }

    #[test]
    fn title_is_sanitized() {
        let raw = "<project><Title> Our/Best:Mod? </Title></project>";
        assert_eq!(parse_descriptor(raw.as_bytes()).title, "Our_Best_Mod_");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for raw in ["  a<b>c|d  ", "plain name", r#"\/:*?"<>|"#, ""] {
            let once = sanitize_title(raw);
            assert_eq!(sanitize_title(&once), once);
        }
    }

    #[test]
    fn description_cdata_is_read() {
        let raw = "<project><ItemDescription><![CDATA[line & <markup>]]></ItemDescription></project>";
        assert_eq!(
            parse_descriptor(raw.as_bytes()).description,
            "line & <markup>"
        );
    }
}
