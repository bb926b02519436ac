//! 薄弱点测验组卷
//!
//! 纯函数：输入作答记录与题库，输出题目 id；除随机打乱外结果确定。

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, HashSet};

use crate::storage::models::{AttemptRecord, Mcq};

/// 候选池相对测验题数的放大倍数
pub const OVERSAMPLE_FACTOR: usize = 3;

#[derive(Debug, Clone, PartialEq)]
struct ChapterAccuracy<'a> {
    topic: &'a str,
    chapter: &'a str,
    accuracy: f64,
}

fn rank_chapters<'a>(attempts: &HashMap<String, AttemptRecord>, pool: &'a [Mcq]) -> Vec<ChapterAccuracy<'a>> {
    let mut stats: HashMap<(&'a str, &'a str), (u32, u32)> = HashMap::new();
    for mcq in pool {
        if let Some(attempt) = attempts.get(&mcq.id) {
            let entry = stats.entry((mcq.topic.as_str(), mcq.chapter.as_str())).or_default();
            entry.1 += 1;
            if attempt.is_correct {
                entry.0 += 1;
            }
        }
    }

    let mut ranked: Vec<ChapterAccuracy<'a>> = stats
        .into_iter()
        .map(|((topic, chapter), (correct, total))| ChapterAccuracy {
            topic,
            chapter,
            accuracy: f64::from(correct) / f64::from(total),
        })
        .collect();
    ranked.sort_by(|a, b| {
        a.accuracy
            .total_cmp(&b.accuracy)
            .then_with(|| a.chapter.cmp(b.chapter))
            .then_with(|| a.topic.cmp(b.topic))
    });
    ranked
}

/// 打乱前的候选池：按章节正确率从低到高取题，达到 3K 即停止；
/// 不足 K 时并入全部从未作答过的题，由打乱在整个题库中均匀抽取。
pub fn candidate_pool(attempts: &HashMap<String, AttemptRecord>, pool: &[Mcq], k: usize) -> Vec<String> {
    if k == 0 {
        return Vec::new();
    }
    let target = k.saturating_mul(OVERSAMPLE_FACTOR);
    let mut seen: HashSet<&str> = HashSet::new();
    let mut candidates: Vec<String> = Vec::new();

    for chapter in rank_chapters(attempts, pool) {
        if candidates.len() >= target {
            break;
        }
        for mcq in pool
            .iter()
            .filter(|m| m.topic == chapter.topic && m.chapter == chapter.chapter)
        {
            if seen.insert(mcq.id.as_str()) {
                candidates.push(mcq.id.clone());
            }
        }
    }

    if candidates.len() < k {
        for mcq in pool.iter().filter(|m| !attempts.contains_key(&m.id)) {
            if seen.insert(mcq.id.as_str()) {
                candidates.push(mcq.id.clone());
            }
        }
    }

    candidates
}

/// 组卷：候选池均匀打乱后取前 K 个，结果为 min(K, 可用题数) 个不重复 id
pub fn assemble_weakness_test<R: Rng + ?Sized>(
    attempts: &HashMap<String, AttemptRecord>,
    pool: &[Mcq],
    k: usize,
    rng: &mut R,
) -> Vec<String> {
    let mut candidates = candidate_pool(attempts, pool, k);
    candidates.shuffle(rng);
    candidates.truncate(k);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::AnswerLetter;
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn mcq(id: String, chapter: &str) -> Mcq {
        Mcq {
            id,
            question: "Q?".into(),
            options: ["a".into(), "b".into(), "c".into(), "d".into()],
            answer: AnswerLetter::A,
            explanation: None,
            topic: "Pediatrics".into(),
            chapter: chapter.into(),
            source_job_id: None,
            created_at: Utc::now(),
        }
    }

    fn attempt(is_correct: bool) -> AttemptRecord {
        AttemptRecord {
            is_correct,
            selected_answer: None,
            incorrect_streak: 0,
            last_seen: None,
        }
    }

    /// A 章节 20 题（正确率 10%），B 章节 20 题（正确率 90%）
    fn two_chapters() -> (Vec<Mcq>, HashMap<String, AttemptRecord>) {
        let mut pool = Vec::new();
        let mut attempts = HashMap::new();
        for i in 0..20 {
            pool.push(mcq(format!("a{}", i), "A"));
            pool.push(mcq(format!("b{}", i), "B"));
        }
        for i in 0..10 {
            attempts.insert(format!("a{}", i), attempt(i == 0));
            attempts.insert(format!("b{}", i), attempt(i != 0));
        }
        (pool, attempts)
    }

    #[test]
    fn weakest_chapter_fills_pool_first() {
        let (pool, attempts) = two_chapters();
        let candidates = candidate_pool(&attempts, &pool, 5);

        let first_b = candidates.iter().position(|id| id.starts_with('b'));
        let last_a = candidates.iter().rposition(|id| id.starts_with('a'));
        assert_eq!(last_a, Some(19));
        assert!(first_b.map_or(true, |b| b > 19));
        // A 的 20 题已超过 3K=15，B 不再进入候选池
        assert_eq!(candidates.len(), 20);
    }

    #[test]
    fn pool_walks_further_chapters_until_oversampled() {
        let (pool, attempts) = two_chapters();
        let candidates = candidate_pool(&attempts, &pool, 10);
        assert_eq!(candidates.len(), 40);
        assert!(candidates[..20].iter().all(|id| id.starts_with('a')));
    }

    #[test]
    fn no_attempts_gives_random_test_from_pool() {
        let pool: Vec<Mcq> = (0..50).map(|i| mcq(format!("m{}", i), "General")).collect();
        let mut rng = StdRng::seed_from_u64(7);

        let ids = assemble_weakness_test(&HashMap::new(), &pool, 10, &mut rng);
        assert_eq!(ids.len(), 10);
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 10);
        assert!(ids.iter().all(|id| pool.iter().any(|m| &m.id == id)));
    }

    #[test]
    fn no_attempts_can_draw_from_the_whole_bank() {
        let pool: Vec<Mcq> = (0..50).map(|i| mcq(format!("m{}", i), "General")).collect();
        assert_eq!(candidate_pool(&HashMap::new(), &pool, 10).len(), 50);

        let mut drawn = HashSet::new();
        for seed in 0..200 {
            let ids = assemble_weakness_test(&HashMap::new(), &pool, 10, &mut StdRng::seed_from_u64(seed));
            drawn.extend(ids);
        }
        assert_eq!(drawn.len(), 50);
        assert!(drawn.contains("m49"));
    }

    #[test]
    fn small_pool_returns_everything_available() {
        let pool: Vec<Mcq> = (0..3).map(|i| mcq(format!("m{}", i), "General")).collect();
        let mut attempts = HashMap::new();
        attempts.insert("m0".to_string(), attempt(false));
        let mut rng = StdRng::seed_from_u64(1);

        let ids = assemble_weakness_test(&attempts, &pool, 20, &mut rng);
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn same_seed_same_test() {
        let (pool, attempts) = two_chapters();
        let a = assemble_weakness_test(&attempts, &pool, 5, &mut StdRng::seed_from_u64(42));
        let b = assemble_weakness_test(&attempts, &pool, 5, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
        assert!(a.iter().all(|id| id.starts_with('a')));
    }

    #[test]
    fn zero_size_is_empty() {
        let (pool, attempts) = two_chapters();
        assert!(candidate_pool(&attempts, &pool, 0).is_empty());
    }
}
