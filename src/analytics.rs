use crate::error::EngineResult;
use crate::model::{Question, QuestionType, ResponseStatus, SessionResponse};
use crate::responses::{list_responses, yes_no_value};
use crate::sessions::load_session;
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionBucket {
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionAnalytics {
    pub question_id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub category: String,
    pub response_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub distribution: Vec<DistributionBucket>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub text_answers: Vec<String>,
    pub text_answer_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAnalytics {
    pub category: String,
    pub average_rating: f64,
    pub answer_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAnalytics {
    pub session_id: String,
    pub total_responses: u64,
    pub average_rating: f64,
    pub completion_rate: f64,
    pub per_question: Vec<QuestionAnalytics>,
    pub per_category: Vec<CategoryAnalytics>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / (values.len() as f64)
}

fn numeric(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Rating answers inside `1..=scale`; anything else is ignored.
fn rating_values<'a>(
    question: &Question,
    answers: impl Iterator<Item = &'a serde_json::Value>,
) -> Vec<f64> {
    let scale = question.scale.unwrap_or(5) as f64;
    answers
        .filter_map(numeric)
        .filter(|v| *v >= 1.0 && *v <= scale)
        .collect()
}

fn bump(buckets: &mut Vec<DistributionBucket>, label: &str) {
    match buckets.iter_mut().find(|b| b.label == label) {
        Some(b) => b.count += 1,
        None => buckets.push(DistributionBucket {
            label: label.to_string(),
            count: 1,
        }),
    }
}

fn zeroed(labels: impl IntoIterator<Item = String>) -> Vec<DistributionBucket> {
    labels
        .into_iter()
        .map(|label| DistributionBucket { label, count: 0 })
        .collect()
}

pub fn aggregate_question(
    question: &Question,
    responses: &[&SessionResponse],
    text_preview_limit: usize,
) -> QuestionAnalytics {
    let answers: Vec<&serde_json::Value> = responses
        .iter()
        .filter_map(|r| r.answers.get(&question.id))
        .filter(|v| !v.is_null())
        .collect();

    let mut out = QuestionAnalytics {
        question_id: question.id.clone(),
        text: question.text.clone(),
        question_type: question.question_type,
        category: question.category.clone(),
        response_count: answers.len() as u64,
        average_rating: None,
        distribution: Vec::new(),
        text_answers: Vec::new(),
        text_answer_count: 0,
    };

    match question.question_type {
        QuestionType::Rating => {
            let scale = question.scale.unwrap_or(5).max(1);
            let values = rating_values(question, answers.iter().copied());
            let mut dist = zeroed((1..=scale).map(|v| v.to_string()));
            for v in &values {
                if v.fract() == 0.0 {
                    dist[(*v as usize) - 1].count += 1;
                }
            }
            out.average_rating = Some(mean(&values));
            out.distribution = dist;
        }
        QuestionType::YesNo => {
            let mut dist = zeroed(["Yes".to_string(), "No".to_string()]);
            for v in &answers {
                match yes_no_value(v) {
                    Some(true) => dist[0].count += 1,
                    Some(false) => dist[1].count += 1,
                    None => {}
                }
            }
            out.distribution = dist;
        }
        QuestionType::MultipleChoice => {
            let mut dist = zeroed(question.options.iter().cloned());
            for v in &answers {
                match v {
                    serde_json::Value::String(s) => bump(&mut dist, s),
                    serde_json::Value::Array(items) => {
                        for item in items.iter().filter_map(|i| i.as_str()) {
                            bump(&mut dist, item);
                        }
                    }
                    _ => {}
                }
            }
            out.distribution = dist;
        }
        QuestionType::Text => {
            let texts: Vec<String> = answers
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            out.text_answer_count = texts.len() as u64;
            out.text_answers = texts.into_iter().take(text_preview_limit).collect();
        }
    }
    out
}

/// Summarises responses over the session's frozen questions.
///
/// The session-level average pools every rating answer across all rating
/// questions, unweighted. Completion rate at this layer is 100 whenever any
/// response exists; the session row keeps the target-based figure.
pub fn aggregate(
    session_id: &str,
    questions: &[Question],
    responses: &[SessionResponse],
    text_preview_limit: usize,
) -> SessionAnalytics {
    let counted: Vec<&SessionResponse> = responses
        .iter()
        .filter(|r| r.status != ResponseStatus::Draft)
        .collect();

    let per_question: Vec<QuestionAnalytics> = questions
        .iter()
        .map(|q| aggregate_question(q, &counted, text_preview_limit))
        .collect();

    let mut pooled: Vec<f64> = Vec::new();
    let mut by_category: Vec<(String, Vec<f64>)> = Vec::new();
    for q in questions.iter().filter(|q| q.question_type == QuestionType::Rating) {
        let values = rating_values(
            q,
            counted.iter().filter_map(|r| r.answers.get(&q.id)),
        );
        pooled.extend(values.iter().copied());
        match by_category.iter_mut().find(|(c, _)| *c == q.category) {
            Some((_, acc)) => acc.extend(values),
            None => by_category.push((q.category.clone(), values)),
        }
    }

    let total = counted.len() as u64;
    SessionAnalytics {
        session_id: session_id.to_string(),
        total_responses: total,
        average_rating: mean(&pooled),
        completion_rate: if total > 0 { 100.0 } else { 0.0 },
        per_question,
        per_category: by_category
            .into_iter()
            .map(|(category, values)| CategoryAnalytics {
                category,
                average_rating: mean(&values),
                answer_count: values.len() as u64,
            })
            .collect(),
    }
}

pub fn session_analytics(
    conn: &Connection,
    session_id: &str,
    text_preview_limit: usize,
) -> EngineResult<SessionAnalytics> {
    let session = load_session(conn, session_id)?;
    let responses = list_responses(conn, session_id)?;
    Ok(aggregate(
        &session.id,
        &session.questions,
        &responses,
        text_preview_limit,
    ))
}
