/*!

This is the long-form manual for `poll_tally` and the `pollwb` workbench.

## The three persisted scopes

The host runtime persists the poll state in three independently addressable
scopes. `poll_tally` never performs the persistence itself, it only computes
new values for the caller to store:

* **settings** (per poll instance): the question, the feedback text and the
  ordered answer set. Overwritten wholesale by a successful editor
  submission.
* **summary** (per poll instance, shared): the tally of votes, one counter
  per answer key. Because it lives in a different scope than the answers, it
  is not updated when the answers are edited. It is reconciled lazily with
  [crate::reconcile] before every read or write instead.
* **user state** (per voter): the voter's recorded choice. Written once on a
  successful vote and never mutated. If the chosen answer is later removed by
  an edit, the record is kept but becomes ineffective and the voter may vote
  again (see [crate::current_choice]).

## The editor form encoding

The studio form submits a flat field map. The fields that matter:

| field           | meaning                                                |
|-----------------|--------------------------------------------------------|
| `question`      | required, truncated to 4096 characters                 |
| `feedback`      | optional, blank is stored as empty, truncated to 4096  |
| `poll_order`    | list of answer keys, authoritative for display order   |
| `answer-<key>`  | the label of answer `<key>`, truncated to 250          |
| `img-answer-<key>` | the image location of answer `<key>`, truncated to 250 |

Entries in `poll_order` may carry the raw `answer-` prefix; it is stripped.
An answer is retained only if its derived key is non-empty, its trimmed
value is non-empty and its key appears in `poll_order`. A retained answer
missing a label or an image gets `None` for that field. Fewer than two
retained answers fail the whole submission and nothing is applied.

## Scenario files

The workbench binary executes a JSON scenario against in-memory stores:

```text
{
  "name": "Customized poll",
  "settings": {
    "question": "## How long have you been studying with us?",
    "answers": [ { "key": "long", "label": "A very long time" }, ... ]
  },
  "tally": { "long": 20, "short": 29 },
  "steps": [
    { "action": "vote", "voter": "s1", "choice": "long" },
    { "action": "results", "voter": "s1" },
    { "action": "edit", "voter": "staff", "fields": { ... } },
    { "action": "answers" }
  ]
}
```

`settings` and `tally` are optional and default to a fresh poll (the classic
favorite-color question). Each step produces one entry in the JSON report;
with `--reference <file>` the report is compared against a stored
expectation and any difference fails the run.

*/
