// src/engine/scoring.rs

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{attempt::Answers, question::Question, result::QuestionReview, stats::CategoryStat};

/// Outcome of grading one submission.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSummary {
    /// Sum of `marks` over correctly answered questions.
    pub score: i64,
    /// Sum of `marks` over all questions.
    pub max_score: i64,
    pub correct_answers: usize,
    pub total_questions: usize,
    pub review: Vec<QuestionReview>,
    pub by_category: BTreeMap<String, CategoryStat>,
}

impl ScoreSummary {
    pub fn percentage(&self) -> f64 {
        percentage(self.score, self.max_score)
    }
}

/// Grades answers against the quiz's questions.
///
/// A question counts as correct when the selected option index equals its
/// `correctOption`. Unanswered questions and answers to unknown question ids
/// score nothing.
pub fn score_submission(questions: &[Question], answers: &Answers) -> ScoreSummary {
    let mut summary = ScoreSummary {
        score: 0,
        max_score: 0,
        correct_answers: 0,
        total_questions: questions.len(),
        review: Vec::with_capacity(questions.len()),
        by_category: BTreeMap::new(),
    };

    for question in questions {
        let selected = answers.get(&question.id).copied();
        let is_correct = selected == Some(question.correct_option);
        let marks_awarded = if is_correct { question.marks } else { 0 };

        summary.max_score += question.marks;
        summary.score += marks_awarded;
        if is_correct {
            summary.correct_answers += 1;
        }

        if let Some(category) = &question.category {
            let tally = summary.by_category.entry(category.clone()).or_default();
            tally.total += 1;
            if is_correct {
                tally.correct += 1;
            }
        }

        summary.review.push(QuestionReview {
            question_id: question.id.clone(),
            selected_option: selected,
            correct_option: question.correct_option,
            is_correct,
            marks_awarded,
            marks: question.marks,
            explanation: question.explanation.clone(),
        });
    }

    summary
}

/// Score as a percentage of the maximum, rounded to two decimals.
pub fn percentage(score: i64, max_score: i64) -> f64 {
    if max_score <= 0 {
        return 0.0;
    }
    round2(score as f64 * 100.0 / max_score as f64)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Position of a new score among the earlier results of the same quiz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Standing {
    pub rank: u32,
    pub percentile: f64,
}

/// Dense ranking: equal scores share a rank and the next distinct lower
/// score takes the following rank (100, 90, 90, 80 → 1, 2, 2, 3).
///
/// Percentile is the share of all results, the new one included, that
/// scored strictly lower.
pub fn standing(prior_scores: &[i64], score: i64) -> Standing {
    let higher: BTreeSet<i64> = prior_scores.iter().copied().filter(|s| *s > score).collect();
    let lower = prior_scores.iter().filter(|s| **s < score).count();
    let population = prior_scores.len() + 1;

    Standing {
        rank: higher.len() as u32 + 1,
        percentile: round2(lower as f64 * 100.0 / population as f64),
    }
}

/// Running mean after adding one sample to `count` earlier ones.
pub fn running_mean(mean: f64, count: i64, sample: f64) -> f64 {
    let count = count.max(0) as f64;
    round2((mean * count + sample) / (count + 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str, correct: usize, marks: i64) -> Question {
        Question {
            id: id.to_string(),
            text: format!("Question {}", id),
            options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            correct_option: correct,
            explanation: None,
            category: None,
            difficulty: None,
            marks,
            position: 0,
            created_at: None,
            updated_at: None,
        }
    }

    fn aptitude_test() -> Vec<Question> {
        (0..20).map(|i| question(&format!("q{}", i), 0, 4)).collect()
    }

    #[test]
    fn fifteen_of_twenty_at_four_marks_scores_sixty() {
        let questions = aptitude_test();
        let answers: Answers = questions
            .iter()
            .enumerate()
            .map(|(i, q)| (q.id.clone(), if i < 15 { 0 } else { 1 }))
            .collect();

        let summary = score_submission(&questions, &answers);
        assert_eq!(summary.score, 60);
        assert_eq!(summary.max_score, 80);
        assert_eq!(summary.correct_answers, 15);
        assert_eq!(summary.total_questions, 20);
        assert_eq!(summary.percentage(), 75.0);
    }

    #[test]
    fn score_is_k_times_marks_for_every_k() {
        let questions = aptitude_test();
        for k in 0..=questions.len() {
            let answers: Answers = questions
                .iter()
                .take(k)
                .map(|q| (q.id.clone(), 0))
                .collect();
            let summary = score_submission(&questions, &answers);
            assert_eq!(summary.score, k as i64 * 4);
            assert_eq!(summary.correct_answers, k);
        }
    }

    #[test]
    fn weighted_marks_and_unknown_ids() {
        let questions = vec![question("a", 1, 1), question("b", 2, 3), question("c", 0, 5)];
        let mut answers = Answers::new();
        answers.insert("a".into(), 1);
        answers.insert("b".into(), 2);
        answers.insert("c".into(), 3);
        answers.insert("ghost".into(), 0);

        let summary = score_submission(&questions, &answers);
        assert_eq!(summary.score, 4);
        assert_eq!(summary.max_score, 9);
        assert_eq!(summary.review.len(), 3);
        assert!(!summary.review[2].is_correct);
        assert_eq!(summary.review[2].selected_option, Some(3));
    }

    #[test]
    fn categories_are_tallied() {
        let mut questions = vec![question("a", 0, 1), question("b", 0, 1), question("c", 0, 1)];
        questions[0].category = Some("Quantitative".into());
        questions[1].category = Some("Quantitative".into());
        questions[2].category = Some("Verbal".into());
        let answers: Answers = [("a".to_string(), 0), ("b".to_string(), 1)].into_iter().collect();

        let summary = score_submission(&questions, &answers);
        assert_eq!(summary.by_category["Quantitative"], CategoryStat { correct: 1, total: 2 });
        assert_eq!(summary.by_category["Verbal"], CategoryStat { correct: 0, total: 1 });
    }

    #[test]
    fn empty_quiz_is_zero_percent() {
        let summary = score_submission(&[], &Answers::new());
        assert_eq!(summary.percentage(), 0.0);
    }

    #[test]
    fn dense_rank_shares_ties() {
        let prior = [100, 90, 90, 80];
        assert_eq!(standing(&prior, 90).rank, 2);
        assert_eq!(standing(&prior, 85).rank, 3);
        assert_eq!(standing(&prior, 100).rank, 1);
        assert_eq!(standing(&prior, 10).rank, 4);
    }

    #[test]
    fn first_result_is_rank_one_zero_percentile() {
        let s = standing(&[], 42);
        assert_eq!(s.rank, 1);
        assert_eq!(s.percentile, 0.0);
    }

    #[test]
    fn percentile_counts_strictly_lower() {
        // 3 of 4 results (new one included) are below 70.
        let s = standing(&[10, 20, 30], 70);
        assert_eq!(s.percentile, 75.0);
        // Ties don't count as lower.
        let s = standing(&[70, 70, 30], 70);
        assert_eq!(s.percentile, 25.0);
    }

    #[test]
    fn running_mean_accumulates() {
        let mut mean = 0.0;
        for (count, sample) in [60.0, 80.0, 100.0].into_iter().enumerate() {
            mean = running_mean(mean, count as i64, sample);
        }
        assert_eq!(mean, 80.0);
    }
}
