mod class_cases;
