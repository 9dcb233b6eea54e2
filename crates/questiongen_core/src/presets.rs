//! Built-in presets seeded into a fresh installation.

use uuid::Uuid;

use crate::domain::{OutputFormat, Preset};

pub const MULTICHOICE_MARKUP_PRESET_ID: Uuid = Uuid::from_u128(0x5f1c_0001);
pub const MULTICHOICE_FLAT_PRESET_ID: Uuid = Uuid::from_u128(0x5f1c_0002);

pub const MULTICHOICE_PRIMER: &str = "You are a helpful teacher's assistant that creates multiple choice questions based on the topics given by the user.";

pub const MULTICHOICE_MARKUP_INSTRUCTIONS: &str = "Please write a multiple choice question in English language in XML format on a topic I will specify to you separately. Only return the plain XML, do not apply any formatting. Use the example provided for generating the questions in XML format. Inside the <quiz> tags you can specify multiple questions wrapped by <question></question>. Replace the string \"Question title\" in the example by the title of the question, the string \"Question text\" with the text of the question. Replace the possible answers \"Choice 1\", \"Choice 2\", \"Choice 3\" and \"Choice 4\" in the example with the options of the generated question. The option that is correct has to have the attribute fraction=\"100\" in the opening \"answer\" tag, the other wrong options have to have fraction=\"0\".";

pub const MULTICHOICE_MARKUP_EXAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<quiz>
  <question type="multichoice">
    <name>
      <text>Question title</text>
    </name>
    <questiontext format="html">
      <text><![CDATA[<p>Question text</p>]]></text>
    </questiontext>
    <generalfeedback format="html">
      <text><![CDATA[<p>General feedback</p>]]></text>
    </generalfeedback>
    <defaultgrade>1</defaultgrade>
    <penalty>0</penalty>
    <hidden>0</hidden>
    <idnumber></idnumber>
    <single>true</single>
    <shuffleanswers>false</shuffleanswers>
    <answernumbering>none</answernumbering>
    <shownumcorrect/>
    <answer fraction="0" format="html">
      <text><![CDATA[<p>Choice 1</p>]]></text>
      <feedback format="html">
        <text><![CDATA[<p>Feedback 1</p>]]></text>
      </feedback>
    </answer>
    <answer fraction="0" format="html">
      <text><![CDATA[<p>Choice 2</p>]]></text>
      <feedback format="html">
        <text><![CDATA[<p>Feedback 2</p>]]></text>
      </feedback>
    </answer>
    <answer fraction="100" format="html">
      <text><![CDATA[<p>Choice 3</p>]]></text>
      <feedback format="html">
        <text><![CDATA[<p>Feedback 3</p>]]></text>
      </feedback>
    </answer>
    <answer fraction="0" format="html">
      <text><![CDATA[<p>Choice 4</p>]]></text>
      <feedback format="html">
        <text><![CDATA[<p>Feedback 4</p>]]></text>
      </feedback>
    </answer>
  </question>
</quiz>"#;

pub const MULTICHOICE_FLAT_INSTRUCTIONS: &str = "Please write a multiple choice question in English language in GIFT format on a topic I will specify to you separately. Return exactly one line and nothing else. Start with the question title wrapped in double colons, followed by the question text and the answers in curly braces. Mark the single correct answer with \"=\" and every wrong answer with \"~\".";

pub const MULTICHOICE_FLAT_EXAMPLE: &str =
    "::Question title::Question text {=Correct choice ~Wrong choice 1 ~Wrong choice 2 ~Wrong choice 3}";

/// The presets available before any user edits them.
pub fn default_presets() -> Vec<Preset> {
    vec![
        Preset {
            id: MULTICHOICE_MARKUP_PRESET_ID,
            name: "Multiple choice question".to_string(),
            primer: MULTICHOICE_PRIMER.to_string(),
            instructions: MULTICHOICE_MARKUP_INSTRUCTIONS.to_string(),
            example: MULTICHOICE_MARKUP_EXAMPLE.to_string(),
            format: OutputFormat::StructuredMarkup,
        },
        Preset {
            id: MULTICHOICE_FLAT_PRESET_ID,
            name: "Multiple choice question (GIFT)".to_string(),
            primer: MULTICHOICE_PRIMER.to_string(),
            instructions: MULTICHOICE_FLAT_INSTRUCTIONS.to_string(),
            example: MULTICHOICE_FLAT_EXAMPLE.to_string(),
            format: OutputFormat::FlatTag,
        },
    ]
}
