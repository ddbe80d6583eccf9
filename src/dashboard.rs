//! Dashboard aggregation over already-loaded records.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::models::{Achievement, Alumni};

const RECENT: usize = 5;
const TOP: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentAchievement {
    pub title: String,
    pub alumni_name: String,
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopAchiever {
    pub name: String,
    pub graduation_year: i32,
    pub achievement_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_alumni: usize,
    pub total_achievements: usize,
    pub total_projects: usize,
    pub recent_achievements: Vec<RecentAchievement>,
    pub achievements_by_year: BTreeMap<i32, usize>,
    pub achievements_by_type: BTreeMap<String, usize>,
    pub top_achievers: Vec<TopAchiever>,
}

pub fn build_dashboard(alumni: &[Alumni], achievements: &[Achievement], total_projects: usize) -> DashboardStats {
    let names: HashMap<i64, &str> = alumni.iter().map(|a| (a.id, a.name.as_str())).collect();

    let mut by_year = BTreeMap::new();
    let mut by_type = BTreeMap::new();
    let mut per_alumni: HashMap<i64, usize> = HashMap::new();
    for a in achievements {
        *by_year.entry(a.date.year()).or_insert(0) += 1;
        *by_type.entry(a.kind.as_str().to_string()).or_insert(0) += 1;
        *per_alumni.entry(a.alumni_id).or_insert(0) += 1;
    }

    let mut sorted: Vec<&Achievement> = achievements.iter().collect();
    sorted.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
    let recent_achievements = sorted
        .into_iter()
        .take(RECENT)
        .map(|a| RecentAchievement {
            title: a.title.clone(),
            alumni_name: names.get(&a.alumni_id).copied().unwrap_or("Unknown").to_string(),
            date: a.date,
            kind: a.kind.as_str().to_string(),
        })
        .collect();

    // stable sort keeps alumni id order among equal counts
    let mut top_achievers: Vec<TopAchiever> = alumni
        .iter()
        .filter_map(|al| {
            per_alumni.get(&al.id).map(|&n| TopAchiever {
                name: al.name.clone(),
                graduation_year: al.graduation_year,
                achievement_count: n,
            })
        })
        .collect();
    top_achievers.sort_by(|a, b| b.achievement_count.cmp(&a.achievement_count));
    top_achievers.truncate(TOP);

    DashboardStats {
        total_alumni: alumni.len(),
        total_achievements: achievements.len(),
        total_projects,
        recent_achievements,
        achievements_by_year: by_year,
        achievements_by_type: by_type,
        top_achievers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{achievements, alumni, connect_memory, seed_demo_data};

    #[tokio::test]
    async fn seeded_dashboard() {
        let pool = connect_memory().await.unwrap();
        seed_demo_data(&pool).await.unwrap();
        let al = alumni::list(&pool).await.unwrap();
        let ach = achievements::list(&pool).await.unwrap();
        let d = build_dashboard(&al, &ach, 4);

        assert_eq!(d.total_alumni, 5);
        assert_eq!(d.total_achievements, 7);
        assert_eq!(d.recent_achievements.len(), 5);
        assert_eq!(d.recent_achievements[0].title, "AACTA Award - Best Short Film");
        assert_eq!(d.recent_achievements[0].alumni_name, "Sarah Chen");
        assert_eq!(d.achievements_by_year.get(&2024), Some(&5));
        assert_eq!(d.achievements_by_year.get(&2023), Some(&2));
        assert_eq!(d.achievements_by_type.get("Festival Selection"), Some(&2));

        let top: Vec<(&str, usize)> = d
            .top_achievers
            .iter()
            .map(|t| (t.name.as_str(), t.achievement_count))
            .collect();
        assert_eq!(
            top,
            vec![
                ("Sarah Chen", 2),
                ("James Mitchell", 2),
                ("Emma Rodriguez", 1),
                ("Michael O'Brien", 1),
                ("Priya Sharma", 1),
            ]
        );
    }

    #[test]
    fn empty_inputs() {
        let d = build_dashboard(&[], &[], 0);
        assert_eq!(d.total_alumni, 0);
        assert!(d.recent_achievements.is_empty());
        assert!(d.top_achievers.is_empty());
    }
}
