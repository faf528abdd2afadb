use crate::types::*;
use anyhow::Result;

const SUMMARY_CHARS: usize = 80;

impl Document {
    /// Flatten the document into ordered outline entries.
    pub fn to_outline(&self) -> OutlineDocument {
        let mut entries = Vec::new();

        if let Some(intro) = &self.intro {
            entries.push(OutlineEntry {
                depth: 0,
                kind: OutlineKind::Intro,
                text: summarize(&intro.plain_text()),
            });
        }

        for part in &self.parts {
            entries.push(OutlineEntry {
                depth: 0,
                kind: OutlineKind::Part,
                text: part.title.clone(),
            });
            for step in &part.nucleus_steps {
                entries.push(OutlineEntry {
                    depth: 1,
                    kind: OutlineKind::Step,
                    text: step.title.clone(),
                });
                entries.extend(step.subtopics.iter().map(|subtopic| OutlineEntry {
                    depth: 2,
                    kind: OutlineKind::Subtopic,
                    text: subtopic.title.clone(),
                }));
            }
        }

        if let Some(conclusion) = &self.conclusion {
            entries.push(OutlineEntry {
                depth: 0,
                kind: OutlineKind::Conclusion,
                text: summarize(&conclusion.plain_text()),
            });
        }

        OutlineDocument {
            title: self.title.clone(),
            entries,
        }
    }
}

impl OutlineDocument {
    pub fn to_text(&self) -> String {
        let mut out = format!("{}\n", self.title);
        for entry in &self.entries {
            let marker = match entry.kind {
                OutlineKind::Intro => "~",
                OutlineKind::Part => "#",
                OutlineKind::Step => "-",
                OutlineKind::Subtopic => "·",
                OutlineKind::Conclusion => "=",
            };
            let indent = "  ".repeat(entry.depth as usize + 1);
            out.push_str(&format!("{indent}{marker} {}\n", entry.text));
        }
        out
    }
}

fn summarize(text: &str) -> String {
    if text.chars().count() <= SUMMARY_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(SUMMARY_CHARS).collect();
    format!("{}…", cut.trim_end())
}

impl DocumentOutput {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save_with_format(&self, path: &str, format: &str) -> Result<()> {
        let content = match format {
            "yaml" => serde_yaml::to_string(self)?,
            "outline" => self.document.to_outline().to_text(),
            "json" | _ => self.to_json()?,
        };
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::MarkupFragment;

    fn document() -> Document {
        Document {
            title: "Guia".to_string(),
            intro: Some(MarkupFragment::paragraph("Bem-vindo.")),
            parts: vec![Part {
                title: "Parte 1: Base".to_string(),
                body: MarkupFragment::default(),
                objective: None,
                concepts: Vec::new(),
                reflection: None,
                instruction_prompt: "Explique.".to_string(),
                nucleus_steps: vec![NucleusStep {
                    title: "Ler".to_string(),
                    color_index: 0,
                    subtopics: vec![Subtopic {
                        title: "Capítulo 1".to_string(),
                        description: None,
                    }],
                }],
                routes: Vec::new(),
                pitfalls: Vec::new(),
                metadata: Metadata::default(),
            }],
            conclusion: Some(MarkupFragment::paragraph("Fim.")),
        }
    }

    #[test]
    fn test_outline_order() {
        let outline = document().to_outline();
        let kinds: Vec<OutlineKind> = outline.entries.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                OutlineKind::Intro,
                OutlineKind::Part,
                OutlineKind::Step,
                OutlineKind::Subtopic,
                OutlineKind::Conclusion
            ]
        );
        assert_eq!(
            outline.to_text(),
            "Guia\n  ~ Bem-vindo.\n  # Parte 1: Base\n    - Ler\n      · Capítulo 1\n  = Fim.\n"
        );
    }

    #[test]
    fn test_summarize_long_text() {
        let long = "a".repeat(100);
        let summary = summarize(&long);
        assert_eq!(summary.chars().count(), SUMMARY_CHARS + 1);
        assert!(summary.ends_with('…'));
    }
}
