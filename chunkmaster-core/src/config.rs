use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Every label, keyword, template and switch the engine uses.
///
/// Unspecified YAML sections fall back to the built-in Portuguese study-guide
/// conventions, so a config file only needs to list what it changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub fields: FieldTable,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub prompt: PromptTemplateConfig,
    #[serde(default)]
    pub substructures: SubstructureConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub repair: RepairConfig,
    /// Pipeline configuration - defines which per-part rules run and in what order
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// List of rules to run in order
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Name of the rule
    pub name: String,
    /// Whether this rule is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RuleConfig {
    fn enabled(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                RuleConfig::enabled("FieldExtraction"),
                RuleConfig::enabled("SubstructureExtraction"),
                RuleConfig::enabled("MetadataSynthesis"),
                // Runs last: it needs the extracted values to know what to strip
                RuleConfig::enabled("ContentSanitizer"),
            ],
        }
    }
}

fn default_part_keywords() -> Vec<String> {
    strings(&["parte"])
}

fn default_conclusion_keywords() -> Vec<String> {
    strings(&["conclus"])
}

fn default_secondary_conclusion_keywords() -> Vec<String> {
    strings(&["final", "síntese", "resumo"])
}

fn default_intro_keywords() -> Vec<String> {
    strings(&["contextualiza", "objetivos"])
}

fn default_excluded_part_titles() -> Vec<String> {
    strings(&["partes"])
}

fn default_title() -> String {
    "ChunkMaster".to_string()
}

fn default_implicit_part_title() -> String {
    "Parte 1: {title}".to_string()
}

fn default_placeholder_text() -> String {
    "O conteúdo desta parte ainda não está disponível para {title}.".to_string()
}

fn default_conclusion_template() -> String {
    "Você concluiu o estudo de {title}. Revise as partes anteriores e coloque em prática o que aprendeu."
        .to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationConfig {
    /// Heading substrings (case-insensitive) that open a part
    #[serde(default = "default_part_keywords")]
    pub part_keywords: Vec<String>,
    /// Heading substrings that open the conclusion
    #[serde(default = "default_conclusion_keywords")]
    pub conclusion_keywords: Vec<String>,
    /// Tried against every heading when no conclusion heading exists
    #[serde(default = "default_secondary_conclusion_keywords")]
    pub secondary_conclusion_keywords: Vec<String>,
    /// Headings whose sections make up the introduction
    #[serde(default = "default_intro_keywords")]
    pub intro_keywords: Vec<String>,
    /// Normalized part titles that are never parts (e.g. a table of contents)
    #[serde(default = "default_excluded_part_titles")]
    pub excluded_part_titles: Vec<String>,
    /// Title used when the document has no heading at all
    #[serde(default = "default_title")]
    pub default_title: String,
    /// Title of the single part created when no part heading exists
    #[serde(default = "default_implicit_part_title")]
    pub implicit_part_title: String,
    /// Body of the placeholder part when every part was filtered out
    #[serde(default = "default_placeholder_text")]
    pub placeholder_text: String,
    /// Conclusion synthesized when no conclusion heading is found
    #[serde(default = "default_conclusion_template")]
    pub conclusion_template: String,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            part_keywords: default_part_keywords(),
            conclusion_keywords: default_conclusion_keywords(),
            secondary_conclusion_keywords: default_secondary_conclusion_keywords(),
            intro_keywords: default_intro_keywords(),
            excluded_part_titles: default_excluded_part_titles(),
            default_title: default_title(),
            implicit_part_title: default_implicit_part_title(),
            placeholder_text: default_placeholder_text(),
            conclusion_template: default_conclusion_template(),
        }
    }
}

/// One label variant. Matching is exact unless `case_insensitive` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelSpec {
    pub text: String,
    #[serde(default)]
    pub case_insensitive: bool,
}

impl LabelSpec {
    pub fn exact(text: &str) -> Self {
        Self {
            text: text.to_string(),
            case_insensitive: false,
        }
    }

    pub fn any_case(text: &str) -> Self {
        Self {
            text: text.to_string(),
            case_insensitive: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionStrategy {
    /// Text after the label on the same line
    InlineSplit,
    /// Items of a list right after the label block (or nested inside it)
    AdjacentList,
    /// Items of a list under a heading whose text is the label
    HeadingList,
    /// Text following a bold or emphasized run that holds the label
    EmphasisRun,
    /// Text of the next block when the label stands alone
    NextBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldFallback {
    None,
    /// Harvest short bold runs from the body
    BoldHarvest,
    /// Build the value from a template
    Synthesize,
}

/// Declarative extraction rule for one field: label variants in priority
/// order, strategies tried in order, and what to do when all of them fail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub labels: Vec<LabelSpec>,
    pub strategies: Vec<ExtractionStrategy>,
    #[serde(default = "default_fallback")]
    pub fallback: FieldFallback,
}

fn default_fallback() -> FieldFallback {
    FieldFallback::None
}

fn scalar_strategies() -> Vec<ExtractionStrategy> {
    vec![
        ExtractionStrategy::InlineSplit,
        ExtractionStrategy::EmphasisRun,
        ExtractionStrategy::NextBlock,
    ]
}

fn default_objective_field() -> FieldSpec {
    FieldSpec {
        labels: vec![
            LabelSpec::exact("Objetivo de Aprendizagem:"),
            LabelSpec::exact("Objetivo:"),
            LabelSpec::any_case("Objetivo Transformador:"),
        ],
        strategies: scalar_strategies(),
        fallback: FieldFallback::None,
    }
}

fn default_concepts_field() -> FieldSpec {
    FieldSpec {
        labels: vec![
            LabelSpec::any_case("Conceitos-chave:"),
            LabelSpec::any_case("Conceitos chave:"),
            LabelSpec::any_case("Principais conceitos:"),
            LabelSpec::any_case("Conceitos:"),
        ],
        strategies: vec![
            ExtractionStrategy::InlineSplit,
            ExtractionStrategy::AdjacentList,
            ExtractionStrategy::HeadingList,
            ExtractionStrategy::EmphasisRun,
        ],
        fallback: FieldFallback::BoldHarvest,
    }
}

fn default_reflection_field() -> FieldSpec {
    FieldSpec {
        labels: vec![LabelSpec::any_case("Pergunta de Reflexão:")],
        strategies: scalar_strategies(),
        fallback: FieldFallback::None,
    }
}

fn default_instruction_field() -> FieldSpec {
    FieldSpec {
        labels: vec![LabelSpec::any_case("Prompt de Instrução:")],
        strategies: scalar_strategies(),
        fallback: FieldFallback::Synthesize,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldTable {
    #[serde(default = "default_objective_field")]
    pub objective: FieldSpec,
    #[serde(default = "default_concepts_field")]
    pub concepts: FieldSpec,
    #[serde(default = "default_reflection_field")]
    pub reflection: FieldSpec,
    #[serde(default = "default_instruction_field")]
    pub instruction: FieldSpec,
    /// Separators between inline concepts (regex)
    #[serde(default = "default_concept_separator")]
    pub concept_separator: String,
    #[serde(default = "default_max_concepts")]
    pub max_concepts: usize,
}

fn default_concept_separator() -> String {
    r"[,;]|\.\s".to_string()
}

fn default_max_concepts() -> usize {
    5
}

impl Default for FieldTable {
    fn default() -> Self {
        Self {
            objective: default_objective_field(),
            concepts: default_concepts_field(),
            reflection: default_reflection_field(),
            instruction: default_instruction_field(),
            concept_separator: default_concept_separator(),
            max_concepts: default_max_concepts(),
        }
    }
}

/// Filters for the bold-run concept harvest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    #[serde(default = "default_harvest_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_harvest_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_harvest_excluded_keywords")]
    pub excluded_keywords: Vec<String>,
    #[serde(default = "default_max_concepts")]
    pub max_items: usize,
}

fn default_harvest_min_chars() -> usize {
    3
}

fn default_harvest_max_chars() -> usize {
    39
}

fn default_harvest_excluded_keywords() -> Vec<String> {
    strings(&["Conceitos", "Objetivo", "Prompt", "Fase"])
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            min_chars: default_harvest_min_chars(),
            max_chars: default_harvest_max_chars(),
            excluded_keywords: default_harvest_excluded_keywords(),
            max_items: default_max_concepts(),
        }
    }
}

/// Templates for the synthesized instruction prompt.
/// Placeholders: `{part}`, `{concept}`, `{objective}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplateConfig {
    #[serde(default = "default_prompt_opening")]
    pub opening: String,
    #[serde(default = "default_prompt_concept_question")]
    pub concept_question: String,
    #[serde(default = "default_prompt_objective")]
    pub objective: String,
    #[serde(default = "default_prompt_closing")]
    pub closing: String,
    /// Regex stripped from the part title before it is named in the prompt
    #[serde(default = "default_part_prefix_pattern")]
    pub part_prefix_pattern: String,
    #[serde(default = "default_max_concepts")]
    pub max_questions: usize,
}

fn default_prompt_opening() -> String {
    "Atue como um tutor especialista e me ajude a dominar o tema \"{part}\".".to_string()
}

fn default_prompt_concept_question() -> String {
    "O que é {concept} e por que é importante?".to_string()
}

fn default_prompt_objective() -> String {
    "Meu objetivo é: {objective}".to_string()
}

fn default_prompt_closing() -> String {
    "Inclua exemplos práticos e aplicações reais para cada ponto.".to_string()
}

fn default_part_prefix_pattern() -> String {
    r"(?i)^parte\s+\d+\s*[:.\-–—]?\s*".to_string()
}

impl Default for PromptTemplateConfig {
    fn default() -> Self {
        Self {
            opening: default_prompt_opening(),
            concept_question: default_prompt_concept_question(),
            objective: default_prompt_objective(),
            closing: default_prompt_closing(),
            part_prefix_pattern: default_part_prefix_pattern(),
            max_questions: default_max_concepts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubstructureConfig {
    #[serde(default = "default_nucleus_labels")]
    pub nucleus_labels: Vec<LabelSpec>,
    #[serde(default = "default_route_labels")]
    pub route_labels: Vec<LabelSpec>,
    #[serde(default = "default_pitfall_labels")]
    pub pitfall_labels: Vec<LabelSpec>,
    /// Route labels containing any of these are "gentle"
    #[serde(default = "default_gentle_keywords")]
    pub gentle_keywords: Vec<String>,
    #[serde(default = "default_problem_labels")]
    pub problem_labels: Vec<LabelSpec>,
    #[serde(default = "default_solution_labels")]
    pub solution_labels: Vec<LabelSpec>,
    /// Stripped from step titles, e.g. "1.2." or "Núcleo 3:"
    #[serde(default = "default_step_prefix_patterns")]
    pub step_prefix_patterns: Vec<String>,
    #[serde(default = "default_palette_size")]
    pub palette_size: usize,
}

fn default_nucleus_labels() -> Vec<LabelSpec> {
    vec![LabelSpec::any_case("Tópicos Nucleares:")]
}

fn default_route_labels() -> Vec<LabelSpec> {
    vec![LabelSpec::any_case("Rotas Alternativas:")]
}

fn default_pitfall_labels() -> Vec<LabelSpec> {
    vec![LabelSpec::any_case("Armadilhas Comuns:")]
}

fn default_gentle_keywords() -> Vec<String> {
    strings(&["simples", "básico", "iniciante"])
}

fn default_problem_labels() -> Vec<LabelSpec> {
    vec![LabelSpec::any_case("Problema:"), LabelSpec::any_case("Problem:")]
}

fn default_solution_labels() -> Vec<LabelSpec> {
    vec![LabelSpec::any_case("Solução:"), LabelSpec::any_case("Solution:")]
}

fn default_step_prefix_patterns() -> Vec<String> {
    vec![
        r"^\d+(?:\.\d+)*\.?\s*".to_string(),
        r"(?i)^núcleo\s*\d*\s*[:.\-–]\s*".to_string(),
    ]
}

fn default_palette_size() -> usize {
    6
}

impl Default for SubstructureConfig {
    fn default() -> Self {
        Self {
            nucleus_labels: default_nucleus_labels(),
            route_labels: default_route_labels(),
            pitfall_labels: default_pitfall_labels(),
            gentle_keywords: default_gentle_keywords(),
            problem_labels: default_problem_labels(),
            solution_labels: default_solution_labels(),
            step_prefix_patterns: default_step_prefix_patterns(),
            palette_size: default_palette_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Ordered taxonomy, shallowest first
    #[serde(default = "default_cognitive_levels")]
    pub cognitive_levels: Vec<String>,
    /// Assigned cyclically by part index
    #[serde(default = "default_learning_styles")]
    pub learning_styles: Vec<String>,
    /// Regex with one capture: the difficulty digit
    #[serde(default = "default_difficulty_pattern")]
    pub difficulty_pattern: String,
    #[serde(default = "default_cognitive_pattern")]
    pub cognitive_pattern: String,
    #[serde(default = "default_style_pattern")]
    pub style_pattern: String,
    /// Regex with one capture: the percentage
    #[serde(default = "default_progress_pattern")]
    pub progress_pattern: String,
    #[serde(default = "default_connections_labels")]
    pub connections_labels: Vec<LabelSpec>,
    #[serde(default = "default_ai_prompt_labels")]
    pub ai_prompt_labels: Vec<LabelSpec>,
    /// Regex with one capture: the challenge text
    #[serde(default = "default_challenge_pattern")]
    pub challenge_pattern: String,
    /// Time annotations removed from the challenge text
    #[serde(default = "default_time_annotation_pattern")]
    pub time_annotation_pattern: String,
    #[serde(default = "default_real_case_labels")]
    pub real_case_labels: Vec<LabelSpec>,
    #[serde(default = "default_checklist_labels")]
    pub checklist_labels: Vec<LabelSpec>,
}

fn default_cognitive_levels() -> Vec<String> {
    strings(&[
        "Lembrar",
        "Compreender",
        "Aplicar",
        "Analisar",
        "Avaliar",
        "Criar",
    ])
}

fn default_learning_styles() -> Vec<String> {
    strings(&["Visual", "Auditivo", "Leitura/Escrita", "Cinestésico"])
}

fn default_difficulty_pattern() -> String {
    r"(?i)dificuldade\s*:?\s*(\d)\s*/\s*5".to_string()
}

fn default_cognitive_pattern() -> String {
    r"(?i)(?:taxonomia de bloom|nível cognitivo)\s*:\s*([^\n]+)".to_string()
}

fn default_style_pattern() -> String {
    r"(?i)estilo de aprendiza(?:do|gem)\s*:\s*([^\n]+)".to_string()
}

fn default_progress_pattern() -> String {
    r"(?i)progresso(?:\s+acumulado)?\s*:\s*(\d{1,3})\s*%".to_string()
}

fn default_connections_labels() -> Vec<LabelSpec> {
    vec![LabelSpec::any_case("Conexões:")]
}

fn default_ai_prompt_labels() -> Vec<LabelSpec> {
    vec![
        LabelSpec::any_case("Prompt para IA:"),
        LabelSpec::any_case("Prompt de IA:"),
    ]
}

fn default_challenge_pattern() -> String {
    r"(?i)(?:^|[^\p{L}-])desafio(?:\s+pr[áa]tico)?\s*(?:\([^)]*\))?\s*:\s*(.+)".to_string()
}

fn default_time_annotation_pattern() -> String {
    r"(?i)\(\s*\d+\s*(?:min(?:utos?)?|h(?:oras?)?)\s*\)\s*:?|^\d+\s*(?:min(?:utos?)?|h(?:oras?)?)\s*:\s*"
        .to_string()
}

fn default_real_case_labels() -> Vec<LabelSpec> {
    vec![
        LabelSpec::any_case("Caso Real:"),
        LabelSpec::any_case("Estudo de Caso:"),
    ]
}

fn default_checklist_labels() -> Vec<LabelSpec> {
    vec![LabelSpec::any_case("Checklist:")]
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            cognitive_levels: default_cognitive_levels(),
            learning_styles: default_learning_styles(),
            difficulty_pattern: default_difficulty_pattern(),
            cognitive_pattern: default_cognitive_pattern(),
            style_pattern: default_style_pattern(),
            progress_pattern: default_progress_pattern(),
            connections_labels: default_connections_labels(),
            ai_prompt_labels: default_ai_prompt_labels(),
            challenge_pattern: default_challenge_pattern(),
            time_annotation_pattern: default_time_annotation_pattern(),
            real_case_labels: default_real_case_labels(),
            checklist_labels: default_checklist_labels(),
        }
    }
}

/// Markers and class names of the achievement / sub-challenge repair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Run the repair on the whole tree before segmentation
    #[serde(default = "default_true")]
    pub pre_pass: bool,
    #[serde(default = "default_achievement_label")]
    pub achievement_label: String,
    #[serde(default = "default_sub_challenge_label")]
    pub sub_challenge_label: String,
    #[serde(default = "default_arrow_glyph")]
    pub arrow_glyph: String,
    /// Classes of dedicated marker elements (`<span class="mini-desafio">`),
    /// in HTML input or as inline HTML inside Markdown
    #[serde(default = "default_marker_classes")]
    pub marker_classes: Vec<String>,
    #[serde(default = "default_achievement_class")]
    pub achievement_class: String,
    #[serde(default = "default_sub_challenge_class")]
    pub sub_challenge_class: String,
    #[serde(default = "default_sub_list_class")]
    pub sub_list_class: String,
    #[serde(default = "default_has_sub_class")]
    pub has_sub_challenge_class: String,
    #[serde(default = "default_unattached_class")]
    pub unattached_class: String,
}

fn default_achievement_label() -> String {
    "Conquista:".to_string()
}

fn default_sub_challenge_label() -> String {
    "Mini-desafio:".to_string()
}

fn default_arrow_glyph() -> String {
    "↳".to_string()
}

fn default_marker_classes() -> Vec<String> {
    strings(&["mini-desafio", "conquest-marker"])
}

fn default_achievement_class() -> String {
    "conquest-item".to_string()
}

fn default_sub_challenge_class() -> String {
    "mini-challenge".to_string()
}

fn default_sub_list_class() -> String {
    "mini-challenges-list".to_string()
}

fn default_has_sub_class() -> String {
    "has-mini-challenge".to_string()
}

fn default_unattached_class() -> String {
    "mini-challenge-unattached".to_string()
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            pre_pass: true,
            achievement_label: default_achievement_label(),
            sub_challenge_label: default_sub_challenge_label(),
            arrow_glyph: default_arrow_glyph(),
            marker_classes: default_marker_classes(),
            achievement_class: default_achievement_class(),
            sub_challenge_class: default_sub_challenge_class(),
            sub_list_class: default_sub_list_class(),
            has_sub_challenge_class: default_has_sub_class(),
            unattached_class: default_unattached_class(),
        }
    }
}

impl EngineConfig {
    /// Load config from file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load config with fallback to default
    pub fn load_with_fallback(path: Option<&str>) -> Self {
        match path {
            Some(p) => Self::load_from_file(p).unwrap_or_else(|e| {
                warn!("failed to load config from {p}: {e}; using defaults");
                Self::default()
            }),
            None => Self::default(),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
segmentation:
  default_title: "Guia"
pipeline:
  rules:
    - name: FieldExtraction
    - name: ContentSanitizer
      enabled: false
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.segmentation.default_title, "Guia");
        assert_eq!(config.segmentation.part_keywords, vec!["parte"]);
        assert_eq!(config.pipeline.rules.len(), 2);
        assert!(config.pipeline.rules[0].enabled);
        assert!(!config.pipeline.rules[1].enabled);
        assert_eq!(config.fields.max_concepts, 5);
        assert_eq!(config.substructures.palette_size, 6);
    }

    #[test]
    fn test_default_config_round_trips_through_yaml() {
        let yaml = EngineConfig::default().to_yaml().unwrap();
        let parsed: EngineConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.metadata.cognitive_levels.len(), 6);
        assert_eq!(parsed.fields.objective.labels.len(), 3);
        assert!(parsed.fields.objective.labels[2].case_insensitive);
        assert!(!parsed.fields.objective.labels[0].case_insensitive);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = EngineConfig::load_with_fallback(Some("/nonexistent/chunkmaster.yaml"));
        assert_eq!(config.segmentation.default_title, "ChunkMaster");
    }
}
