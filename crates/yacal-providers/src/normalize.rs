//! Mapping of upstream payloads to [`NormalizedEvent`]s.
//!
//! Every function here is pure: same payload and window, same events, in
//! upstream order. Filtering by the requested week happens here as well,
//! since each upstream has its own idea of which instant "belongs" to it.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use url::Url;
use yacal_core::{EventKind, NormalizedEvent, TimeWindow};

use crate::lms::{LmsCourse, LmsSection};
use crate::modeus::ModeusCalendar;
use crate::netology::{LessonItem, NetologyCalendar};

/// Placeholder for a course or teacher the timetable does not resolve.
pub const UNKNOWN: &str = "unknown";

static DEADLINE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{2}.\d{2}.\d{2}").expect("Invalid deadline regex"));

/// Deadline embedded in a homework title as `dd.mm.yy`, at midnight UTC.
///
/// A `00` day or month is read as `01`.
pub fn homework_deadline(title: &str) -> Option<DateTime<Utc>> {
    let found = DEADLINE_REGEX.find(title)?;
    let date = found.as_str().replace("00.", "01.");
    NaiveDate::parse_from_str(&date, "%d.%m.%y")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}

/// Homework and webinars of one Netology program that fall in `window`.
pub fn netology_events(
    calendar: &NetologyCalendar,
    window: &TimeWindow,
    base_url: &Url,
) -> Vec<NormalizedEvent> {
    calendar
        .lessons
        .iter()
        .flat_map(|lesson| &lesson.lesson_items)
        .filter_map(|item| {
            if item.is_homework() {
                homework(item, window, base_url, &calendar.block_title)
            } else if item.is_webinar() {
                webinar(item, window, &calendar.block_title)
            } else {
                None
            }
        })
        .collect()
}

fn homework(
    item: &LessonItem,
    window: &TimeWindow,
    base_url: &Url,
    block_title: &str,
) -> Option<NormalizedEvent> {
    let deadline = homework_deadline(&item.title)?;
    if !window.contains_exclusive(deadline) {
        return None;
    }

    let mut event = NormalizedEvent::new(item.id.to_string(), EventKind::Homework, &item.title)
        .with_course(block_title)
        .with_deadline(deadline);
    if let Some(link) = item.path.as_deref().and_then(|path| base_url.join(path).ok()) {
        event = event.with_url(link.to_string());
    }
    Some(event)
}

fn webinar(item: &LessonItem, window: &TimeWindow, block_title: &str) -> Option<NormalizedEvent> {
    let (starts_at, ends_at) = (item.starts_at?, item.ends_at?);
    if starts_at.to_utc() < window.start() || ends_at.to_utc() > window.end() {
        return None;
    }

    let mut event = NormalizedEvent::new(item.id.to_string(), EventKind::Webinar, &item.title)
        .with_course(block_title)
        .with_start(starts_at)
        .with_end(ends_at);
    if let Some(url) = &item.webinar_url {
        event = event.with_url(url);
    }
    Some(event)
}

/// Timetable events joined with their course and teacher.
///
/// The search endpoint already scopes events to the requested week, so no
/// window filtering happens here. Events held in the LXP, or with no known
/// location, are dropped.
pub fn modeus_events(calendar: &ModeusCalendar) -> Vec<NormalizedEvent> {
    let embedded = &calendar.embedded;

    let locations: HashMap<&str, _> = embedded
        .locations
        .iter()
        .map(|location| (location.event_id.as_str(), location))
        .collect();
    let courses: HashMap<&str, &str> = embedded
        .courses
        .iter()
        .map(|course| (course.id.as_str(), course.name.as_str()))
        .collect();
    let people: HashMap<&str, &str> = embedded
        .persons
        .iter()
        .map(|person| (person.id.as_str(), person.full_name.as_str()))
        .collect();
    let teachers: HashMap<String, String> = embedded
        .attendees
        .iter()
        .map(|attendee| (attendee.links.event.id(), attendee.links.person.id()))
        .collect();

    embedded
        .events
        .iter()
        .filter(|event| {
            locations
                .get(event.id.as_str())
                .is_some_and(|location| !location.is_lxp())
        })
        .map(|event| {
            let joined = event
                .links
                .course_unit_realization
                .as_ref()
                .map(|link| link.id())
                .and_then(|course_id| courses.get(course_id.as_str()).copied())
                .zip(
                    teachers
                        .get(&event.id)
                        .and_then(|person_id| people.get(person_id.as_str()).copied()),
                );
            let (course, teacher) = joined.unwrap_or((UNKNOWN, UNKNOWN));

            let mut normalized =
                NormalizedEvent::new(&event.id, EventKind::ScheduledClass, &event.name)
                    .with_course(course)
                    .with_teacher(teacher)
                    .with_start(event.start)
                    .with_end(event.end);
            if let Some(description) = &event.description {
                normalized = normalized.with_description(description);
            }
            normalized
        })
        .collect()
}

/// Visible modules of one course whose due date falls in `window`.
pub fn lms_events(
    course: &LmsCourse,
    sections: &[LmsSection],
    window: &TimeWindow,
) -> Vec<NormalizedEvent> {
    sections
        .iter()
        .flat_map(|section| &section.modules)
        .filter(|module| module.uservisible)
        .filter_map(|module| {
            let (opens, due) = module.span()?;
            if !window.contains_exclusive(due) {
                return None;
            }
            let mut event =
                NormalizedEvent::new(module.id.to_string(), EventKind::LmsModule, &module.name)
                    .with_course(&course.fullname)
                    .with_start(opens)
                    .with_end(due)
                    .with_completed(module.is_completed());
            if let Some(url) = &module.url {
                event = event.with_url(url);
            }
            Some(event)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn week() -> TimeWindow {
        TimeWindow::containing(NaiveDate::from_ymd_opt(2024, 9, 23).unwrap())
    }

    fn utc(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, d, h, m, 0).unwrap()
    }

    mod deadlines {
        use super::*;

        #[test]
        fn parses_date_in_title() {
            assert_eq!(
                homework_deadline("Домашнее задание до 26.09.24"),
                Some(utc(26, 0, 0))
            );
        }

        #[test]
        fn zero_components_become_first() {
            assert_eq!(
                homework_deadline("Сдать 00.10.24"),
                Some(Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap())
            );
        }

        #[test]
        fn missing_or_malformed_dates() {
            assert_eq!(homework_deadline("Домашнее задание"), None);
            assert_eq!(homework_deadline("Сдать 26-09-24"), None);
            assert_eq!(homework_deadline("Сдать 31.02.24"), None);
        }
    }

    mod netology {
        use super::*;

        fn calendar(items: serde_json::Value) -> NetologyCalendar {
            serde_json::from_value(serde_json::json!({
                "title": "Python",
                "lessons": [{"lesson_items": items}]
            }))
            .unwrap()
        }

        fn base() -> Url {
            Url::parse("https://netology.ru").unwrap()
        }

        #[test]
        fn homework_deadline_bounds_are_exclusive() {
            let events = netology_events(
                &calendar(serde_json::json!([
                    {"id": 1, "type": "task", "title": "ДЗ 26.09.24", "path": "/p/1"},
                    {"id": 2, "type": "quiz", "title": "Тест 23.09.24"},
                    {"id": 3, "type": "test", "title": "Тест 01.10.24"},
                    {"id": 4, "type": "task", "title": "Без срока"}
                ])),
                &week(),
                &base(),
            );

            assert_eq!(events.len(), 1);
            assert_eq!(events[0].id, "1");
            assert_eq!(events[0].deadline().map(|d| d.to_utc()), Some(utc(26, 0, 0)));
            assert_eq!(events[0].url.as_deref(), Some("https://netology.ru/p/1"));
            assert_eq!(events[0].course.as_deref(), Some("Python"));
        }

        #[test]
        fn webinars_must_fit_the_window() {
            let events = netology_events(
                &calendar(serde_json::json!([
                    {"id": 5, "type": "webinar", "title": "Внутри",
                     "starts_at": "2024-09-24T19:00:00+03:00", "ends_at": "2024-09-24T20:30:00+03:00",
                     "webinar_url": "https://netology.ru/w/5"},
                    {"id": 6, "type": "webinar", "title": "Без конца",
                     "starts_at": "2024-09-24T19:00:00+03:00"},
                    {"id": 7, "type": "webinar", "title": "Позже",
                     "starts_at": "2024-09-30T19:00:00+03:00", "ends_at": "2024-09-30T20:30:00+03:00"},
                    {"id": 8, "type": "webinar", "title": "На границе",
                     "starts_at": "2024-09-23T00:00:00Z", "ends_at": "2024-09-23T01:00:00Z"}
                ])),
                &week(),
                &base(),
            );

            let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
            assert_eq!(ids, ["5", "8"]);
            assert_eq!(events[0].start_utc(), Some(utc(24, 16, 0)));
            assert_eq!(events[0].url.as_deref(), Some("https://netology.ru/w/5"));
        }

        #[test]
        fn other_item_types_are_ignored() {
            let events = netology_events(
                &calendar(serde_json::json!([
                    {"id": 9, "type": "video", "title": "Лекция 25.09.24"}
                ])),
                &week(),
                &base(),
            );
            assert!(events.is_empty());
        }
    }

    mod modeus {
        use super::*;
        use crate::modeus::tests::SEARCH_RESPONSE;

        #[test]
        fn joins_course_and_teacher() {
            let calendar: ModeusCalendar = serde_json::from_str(SEARCH_RESPONSE).unwrap();
            let events = modeus_events(&calendar);

            assert_eq!(events.len(), 2);
            let lecture = &events[0];
            assert_eq!(lecture.id, "ev-1");
            assert_eq!(lecture.kind, EventKind::ScheduledClass);
            assert_eq!(lecture.course.as_deref(), Some("Дискретная математика"));
            assert_eq!(lecture.teacher.as_deref(), Some("Иванов Иван Иванович"));
            assert_eq!(lecture.description.as_deref(), Some("Графы"));
            assert_eq!(lecture.start_utc(), Some(utc(23, 3, 0)));
        }

        #[test]
        fn unresolved_joins_fall_back_to_unknown() {
            let calendar: ModeusCalendar = serde_json::from_str(SEARCH_RESPONSE).unwrap();
            let practice = modeus_events(&calendar).pop().unwrap();
            assert_eq!(practice.id, "ev-3");
            assert_eq!(practice.course.as_deref(), Some(UNKNOWN));
            assert_eq!(practice.teacher.as_deref(), Some(UNKNOWN));
        }

        #[test]
        fn events_without_location_are_dropped() {
            let calendar: ModeusCalendar = serde_json::from_value(serde_json::json!({
                "_embedded": {
                    "events": [{
                        "id": "lonely", "name": "?",
                        "start": "2024-09-23T08:00:00Z", "end": "2024-09-23T09:00:00Z"
                    }]
                }
            }))
            .unwrap();
            assert!(modeus_events(&calendar).is_empty());
        }
    }

    mod lms {
        use super::*;

        fn course() -> LmsCourse {
            serde_json::from_value(serde_json::json!({"id": 10, "shortname": "PHY", "fullname": "Физика"}))
                .unwrap()
        }

        fn module(id: i64, visible: bool, due: DateTime<Utc>, state: i64) -> serde_json::Value {
            serde_json::json!({
                "id": id, "name": format!("Модуль {id}"), "uservisible": visible, "modname": "assign",
                "url": format!("https://lms.utmn.ru/mod/assign/view.php?id={id}"),
                "dates": [
                    {"label": "Opened:", "timestamp": utc(16, 0, 0).timestamp()},
                    {"label": "Due:", "timestamp": due.timestamp()}
                ],
                "completiondata": {"state": state}
            })
        }

        #[test]
        fn keeps_visible_modules_due_this_week() {
            let sections: Vec<LmsSection> = serde_json::from_value(serde_json::json!([
                {"id": 1, "name": "Неделя 1", "modules": [
                    module(1, true, utc(27, 20, 59), 1),
                    module(2, false, utc(27, 20, 59), 0),
                    module(3, true, utc(30, 12, 0), 0)
                ]},
                {"id": 2, "name": "Неделя 2", "modules": [
                    module(4, true, utc(25, 9, 0), 2),
                    {"id": 5, "name": "Файл", "modname": "resource", "dates": []}
                ]}
            ]))
            .unwrap();

            let events = lms_events(&course(), &sections, &week());
            let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
            assert_eq!(ids, ["1", "4"]);

            assert_eq!(events[0].completed, Some(true));
            assert_eq!(events[0].end_utc(), Some(utc(27, 20, 59)));
            assert_eq!(events[0].start_utc(), Some(utc(16, 0, 0)));
            assert_eq!(events[0].course.as_deref(), Some("Физика"));
            assert_eq!(events[1].completed, Some(false));
        }
    }
}
