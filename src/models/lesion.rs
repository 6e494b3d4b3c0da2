use crate::utils::error::SpotError;
use crate::Result;
use serde::Serialize;

/// 病变类别表，索引顺序与模型输出一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LesionCategory {
    ActinicKeratoses,
    BasalCellCarcinoma,
    BenignKeratosis,
    Dermatofibroma,
    MelanocyticNevi,
    Melanoma,
    VascularLesions,
}

impl LesionCategory {
    pub const COUNT: usize = 7;

    pub const ALL: [LesionCategory; Self::COUNT] = [
        LesionCategory::ActinicKeratoses,
        LesionCategory::BasalCellCarcinoma,
        LesionCategory::BenignKeratosis,
        LesionCategory::Dermatofibroma,
        LesionCategory::MelanocyticNevi,
        LesionCategory::Melanoma,
        LesionCategory::VascularLesions,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            LesionCategory::ActinicKeratoses => "Actinic keratoses",
            LesionCategory::BasalCellCarcinoma => "Basal cell carcinoma",
            LesionCategory::BenignKeratosis => "Benign keratosis-like lesions",
            LesionCategory::Dermatofibroma => "Dermatofibroma",
            LesionCategory::MelanocyticNevi => "Melanocytic nevi",
            LesionCategory::Melanoma => "Melanoma",
            LesionCategory::VascularLesions => "Vascular lesions",
        }
    }

    /// HAM10000 数据集中的缩写
    pub fn code(self) -> &'static str {
        match self {
            LesionCategory::ActinicKeratoses => "akiec",
            LesionCategory::BasalCellCarcinoma => "bcc",
            LesionCategory::BenignKeratosis => "bkl",
            LesionCategory::Dermatofibroma => "df",
            LesionCategory::MelanocyticNevi => "nv",
            LesionCategory::Melanoma => "mel",
            LesionCategory::VascularLesions => "vasc",
        }
    }
}

impl std::fmt::Display for LesionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 单次预测结果
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub category: LesionCategory,
    pub index: usize,
    pub label: String,
    pub code: String,
    /// 最大类别概率 (0.0 - 1.0)
    pub confidence: f32,
    pub probabilities: Vec<f32>,
}

impl Prediction {
    /// 取 arg-max 作为预测类别，最大概率作为置信度
    pub fn from_distribution(probabilities: Vec<f32>) -> Result<Self> {
        if probabilities.len() != LesionCategory::COUNT {
            return Err(SpotError::Inference(format!(
                "Model returned {} classes, expected {}",
                probabilities.len(),
                LesionCategory::COUNT
            )));
        }

        if let Some(bad) = probabilities.iter().find(|p| !p.is_finite()) {
            return Err(SpotError::Inference(format!(
                "Model returned a non-finite probability: {}",
                bad
            )));
        }

        // 未经softmax的logits会落在 [0, 1] 之外
        if let Some(bad) = probabilities.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(SpotError::Inference(format!(
                "Model returned a value outside [0, 1]: {} (is the softmax layer missing?)",
                bad
            )));
        }

        let mut max_idx = 0;
        let mut max_prob = probabilities[0];
        for (i, &prob) in probabilities.iter().enumerate().skip(1) {
            if prob > max_prob {
                max_prob = prob;
                max_idx = i;
            }
        }

        let category = LesionCategory::from_index(max_idx).ok_or_else(|| {
            SpotError::Inference(format!("No lesion category for index {}", max_idx))
        })?;

        Ok(Self {
            category,
            index: max_idx,
            label: category.name().to_string(),
            code: category.code().to_string(),
            confidence: max_prob,
            probabilities,
        })
    }
}
