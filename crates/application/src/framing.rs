//! 领域上下文包装
//!
//! 提交到队列前为每个分析补充区域、数据来源和分析框架，并把原始内容包装成
//! 带有分析要求的提示文本。

use serde_json::{json, Map, Value};

use orchestrator_config::AnalysisContextConfig;
use orchestrator_core::time::Timestamp;

use crate::analysis::AnalysisKind;

pub const CONTEXT_ECONOMIC_FRAMEWORK: &str = "economic_framework";
pub const CONTEXT_DATA_SOURCES: &str = "data_sources";
pub const CONTEXT_FOCUS_REGION: &str = "focus_region";
pub const CONTEXT_ANALYSIS_TIMESTAMP: &str = "analysis_timestamp";
pub const CONTEXT_VERIFICATION_ENABLED: &str = "verification_enabled";

#[derive(Debug, Clone)]
pub struct AnalysisFraming {
    context: AnalysisContextConfig,
    verification_enabled: bool,
}

impl AnalysisFraming {
    pub fn new(context: AnalysisContextConfig, verification_enabled: bool) -> Self {
        Self {
            context,
            verification_enabled,
        }
    }

    pub fn focus_region(&self) -> &str {
        &self.context.focus_region
    }

    pub fn specialization_areas(&self) -> &[String] {
        &self.context.specialization_areas
    }

    /// 在调用方上下文上叠加领域字段，同名字段会被覆盖
    pub fn frame_context(&self, context: &Map<String, Value>, now: Timestamp) -> Map<String, Value> {
        let mut framed = context.clone();
        framed.insert(
            CONTEXT_ECONOMIC_FRAMEWORK.to_string(),
            json!(format!(
                "{} macroeconomic analysis ({})",
                self.context.focus_region, self.context.framework
            )),
        );
        framed.insert(
            CONTEXT_DATA_SOURCES.to_string(),
            json!(self.context.primary_data_sources),
        );
        framed.insert(
            CONTEXT_FOCUS_REGION.to_string(),
            json!(self.context.focus_region),
        );
        framed.insert(
            CONTEXT_ANALYSIS_TIMESTAMP.to_string(),
            json!(now.timestamp_millis() as f64 / 1000.0),
        );
        framed.insert(
            CONTEXT_VERIFICATION_ENABLED.to_string(),
            json!(self.verification_enabled),
        );
        framed
    }

    pub fn frame_content(&self, content: &str, kind: AnalysisKind) -> String {
        let region = &self.context.focus_region;
        format!(
            "Economic Analysis Context:\n\
             - Focus: {region} economic conditions and policy implications\n\
             - Framework: {framework} model and monetary transmission mechanisms\n\
             - Data sources: {sources}\n\
             - Perspective: consider both domestic and international factors\n\
             \n\
             Analysis Type: {kind}\n\
             \n\
             Original Content:\n\
             {content}\n\
             \n\
             Please provide comprehensive analysis with:\n\
             1. Clear economic reasoning\n\
             2. Quantitative evidence where possible\n\
             3. Policy implications\n\
             4. Uncertainty assessment\n\
             5. {region}-specific considerations\n",
            framework = self.context.framework,
            sources = self.context.primary_data_sources.join(", "),
        )
    }

    pub fn verification_content(
        &self,
        content: &str,
        primary_result: Option<&Value>,
        kind: AnalysisKind,
    ) -> String {
        let primary = match primary_result {
            Some(value @ Value::Object(_)) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            Some(Value::String(text)) => text.clone(),
            Some(value) => value.to_string(),
            None => "(no result)".to_string(),
        };
        format!(
            "Verification Request:\n\
             \n\
             Original Analysis: {kind}\n\
             \n\
             Original Content:\n\
             {content}\n\
             \n\
             Primary Result to Verify:\n\
             {primary}\n\
             \n\
             Verification Tasks:\n\
             1. Assess the logical consistency of the analysis\n\
             2. Check for factual accuracy\n\
             3. Evaluate the strength of economic reasoning\n\
             4. Identify potential biases or errors\n\
             5. Rate confidence level (0-100%)\n\
             6. Suggest improvements if needed\n\
             \n\
             Respond with a JSON object containing a boolean \"consensus\" field.\n"
        )
    }

    pub fn hypothesis_content(&self, data: &Map<String, Value>, focus_areas: &[String]) -> String {
        let data = serde_json::to_string_pretty(data).unwrap_or_default();
        let focus = if focus_areas.is_empty() {
            "General economic patterns".to_string()
        } else {
            focus_areas.join(", ")
        };
        format!(
            "Economic Hypothesis Generation Request:\n\
             \n\
             Economic Data Summary:\n\
             {data}\n\
             \n\
             Focus Areas: {focus}\n\
             \n\
             Please analyze the provided economic data and generate:\n\
             1. Novel economic hypotheses with explanatory mechanisms\n\
             2. Testable predictions with a validation timeline\n\
             3. Policy implications and implementation challenges\n\
             4. Research priorities and data collection needs\n\
             \n\
             Format as structured JSON with confidence scores for each hypothesis.\n"
        )
    }

    pub fn policy_content(&self, description: &str, indicators: &Map<String, Value>) -> String {
        let indicators = serde_json::to_string_pretty(indicators).unwrap_or_default();
        format!(
            "Policy Analysis Request:\n\
             \n\
             Policy Description: {description}\n\
             \n\
             Current Economic Indicators:\n\
             {indicators}\n\
             \n\
             Analysis Requirements:\n\
             - Assess immediate and long-term impacts\n\
             - Consider {region} economic structure\n\
             - Evaluate sector-specific effects\n\
             - Quantify uncertainty ranges\n\
             - Provide policy recommendations\n",
            region = self.context.focus_region,
        )
    }
}

/// 描述中提到利率时视为货币政策
pub fn policy_type(description: &str) -> &'static str {
    if description.to_lowercase().contains("interest rate") {
        "monetary"
    } else {
        "fiscal"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn framing() -> AnalysisFraming {
        AnalysisFraming::new(AnalysisContextConfig::default(), true)
    }

    #[test]
    fn test_context_framing_overrides_domain_keys() {
        let mut context = Map::new();
        context.insert("series".to_string(), json!("cpi"));
        context.insert(CONTEXT_FOCUS_REGION.to_string(), json!("Elsewhere"));
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();

        let framed = framing().frame_context(&context, now);
        assert_eq!(framed["series"], json!("cpi"));
        assert_eq!(framed[CONTEXT_FOCUS_REGION], json!("Australia"));
        assert_eq!(framed[CONTEXT_DATA_SOURCES], json!(["RBA", "ABS", "Treasury"]));
        assert_eq!(framed[CONTEXT_VERIFICATION_ENABLED], json!(true));
        assert_eq!(
            framed[CONTEXT_ANALYSIS_TIMESTAMP].as_f64(),
            Some(now.timestamp() as f64)
        );
        assert!(framed[CONTEXT_ECONOMIC_FRAMEWORK]
            .as_str()
            .unwrap()
            .contains("circular_flow"));
    }

    #[test]
    fn test_content_framing_keeps_original() {
        let framed = framing().frame_content("Explain the wage growth slowdown", AnalysisKind::Forecasting);
        assert!(framed.contains("Analysis Type: forecasting"));
        assert!(framed.contains("Explain the wage growth slowdown"));
        assert!(framed.contains("RBA, ABS, Treasury"));
    }

    #[test]
    fn test_verification_content_embeds_result() {
        let result = json!({"summary": "inflation easing"});
        let content = framing().verification_content(
            "cpi outlook",
            Some(&result),
            AnalysisKind::DataAnalysis,
        );
        assert!(content.contains("inflation easing"));
        assert!(content.contains("\"consensus\""));
    }

    #[test]
    fn test_policy_type() {
        assert_eq!(policy_type("Raise the cash Interest Rate by 25bp"), "monetary");
        assert_eq!(policy_type("Expand infrastructure spending"), "fiscal");
    }
}
