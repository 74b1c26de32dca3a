//! text-classification / image-classification
//!
//! どちらも logits → softmax → 降順ランキング。
//! label 名を持たない artifact には位置から `LABEL_{i}` を付けます。

use crate::domain::{
    HoardError, ImageClassification, ImageClassificationParams, LabelScore, TextClassification,
    TextClassificationParams,
};
use crate::ports::{ImageClassifier, ImageProcessor, SequenceClassifier, Tokenizer};

pub fn classify_text(
    tokenizer: &dyn Tokenizer,
    model: &dyn SequenceClassifier,
    text: &str,
    params: &TextClassificationParams,
) -> Result<TextClassification, HoardError> {
    if text.trim().is_empty() {
        return Err(HoardError::invalid_input("text input must not be empty"));
    }

    let input_ids = tokenizer.encode(text, Some(params.max_length as usize))?;
    let logits = model.logits(&input_ids)?;
    let ranked = rank(&softmax(&logits), model.labels());
    let top = top_of(&ranked)?;

    if params.return_all_scores {
        Ok(TextClassification::Ranked {
            predictions: ranked,
            top_prediction: top,
        })
    } else {
        Ok(TextClassification::Top {
            label: top.label,
            score: top.score,
            all_scores: ranked,
        })
    }
}

pub fn classify_image(
    processor: &dyn ImageProcessor,
    model: &dyn ImageClassifier,
    image: &[u8],
    params: &ImageClassificationParams,
) -> Result<ImageClassification, HoardError> {
    if image.is_empty() {
        return Err(HoardError::invalid_input("image input must not be empty"));
    }

    let pixel_values = processor.preprocess(image)?;
    let logits = model.logits(&pixel_values)?;
    let ranked = rank(&softmax(&logits), model.labels());
    let top_prediction = top_of(&ranked)?;

    let predictions = ranked
        .into_iter()
        .filter(|p| p.score >= params.confidence_threshold)
        .take(params.top_k as usize)
        .collect();

    Ok(ImageClassification {
        predictions,
        top_prediction,
    })
}

/// 数値的に安定な softmax（最大値を引いてから exp）
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// スコアに label を付けて降順に並べる（同点は元の順序）
pub fn rank(scores: &[f32], labels: Option<&[String]>) -> Vec<LabelScore> {
    let mut ranked: Vec<LabelScore> = scores
        .iter()
        .enumerate()
        .map(|(i, score)| {
            let label = labels
                .and_then(|names| names.get(i))
                .cloned()
                .unwrap_or_else(|| format!("LABEL_{i}"));
            LabelScore::new(label, *score)
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

fn top_of(ranked: &[LabelScore]) -> Result<LabelScore, HoardError> {
    ranked
        .first()
        .cloned()
        .ok_or_else(|| HoardError::inference("model produced no scores"))
}
