//! Fallback plan template used when the drafter's own prompt doesn't already
//! embed a project-local template (spec.md §4.6 step 2).

pub fn fallback_template(title: &str, task_id: &str) -> String {
    format!(
        "# Plan: {title}\n\
**ID:** {{plan_id}}\n\
**Task:** {task_id}\n\
**Status:** DRAFT\n\
**Created:** {{created}}\n\n\
## Objective\n\n\
## Scope\n\n\
## Changes\n\n\
## Risks\n\n\
## Testing\n\n\
## Audit Log\n\n\
## Implementation Notes\n"
    )
}
